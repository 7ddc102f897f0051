pub const SCHEMA_VERSION: u32 = 1;

/// Tables are named after their collection; `ts` is the key in Unix ms.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS heartrate (
    ts  INTEGER PRIMARY KEY NOT NULL,
    bpm INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS stress (
    ts    INTEGER PRIMARY KEY NOT NULL,
    level INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS spo2 (
    ts      INTEGER PRIMARY KEY NOT NULL,
    percent INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS activity (
    ts         INTEGER PRIMARY KEY NOT NULL,
    steps      INTEGER NOT NULL,
    calories   INTEGER NOT NULL,
    distance_m INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS hrv (
    ts       INTEGER PRIMARY KEY NOT NULL,
    rmssd_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS temperature (
    ts      INTEGER PRIMARY KEY NOT NULL,
    celsius REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS sleep (
    ts     INTEGER PRIMARY KEY NOT NULL,
    end_ts INTEGER NOT NULL,
    stage  TEXT NOT NULL
);
"#;

/// Applied to every store, scratch stores included.
pub const FILE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;
