pub const SCHEMA: &str = "
    CREATE TABLE records (
        id INTEGER NOT NULL PRIMARY KEY,
        title TEXT,
        content TEXT,
        thumb_url TEXT,
        updated_at INTEGER
    );

    CREATE TABLE tags (
        id INTEGER NOT NULL PRIMARY KEY,
        record_id INTEGER,
        tag TEXT,
        FOREIGN KEY(record_id) REFERENCES records(id)
    );

    CREATE TABLE images (
        id INTEGER NOT NULL PRIMARY KEY,
        record_id INTEGER,
        url TEXT,
        FOREIGN KEY(record_id) REFERENCES records(id)
    );
";
