//! Tests for the SQL authentication source.

use std::sync::Arc;

use serde_json::json;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection as _, Executor as _};
use tempfile::TempDir;

use crate::error::{AuthError, ErrorKind};
use crate::hash::{EncoderOptions, encoder_for};
use crate::sql::{AuthSourceSql, DriverFamily, SourceConfig};
use crate::traits::UserPassAuth;

const ALGORITHM: &str = "sha512";

/// A file-backed SQLite database that outlives single connections.
struct TestDb {
    _dir: TempDir,
    dsn: String,
}

impl TestDb {
    async fn connect(&self) -> SqliteConnection {
        SqliteConnection::connect(&self.dsn)
            .await
            .expect("Failed to connect")
    }

    async fn execute(&self, sql: &str) {
        let mut conn = self.connect().await;
        conn.execute(sql).await.expect("Failed to execute");
        conn.close().await.unwrap();
    }

    fn source(&self) -> AuthSourceSql {
        self.source_with(|c| c)
    }

    fn source_with(&self, f: impl FnOnce(SourceConfig) -> SourceConfig) -> AuthSourceSql {
        let config = SourceConfig::new(&self.dsn, "", "", "users", ALGORITHM);
        AuthSourceSql::new("test-sql", f(config)).expect("Failed to build source")
    }
}

fn hash(password: &str, salt: &str) -> String {
    encoder_for(ALGORITHM, EncoderOptions::default())
        .unwrap()
        .encode(password, salt)
        .unwrap()
}

/// Create a test database with the given schema.
async fn setup_test_db(schema: &str) -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite:{}?mode=rwc", dir.path().join("users.db").display());
    let db = TestDb { _dir: dir, dsn };
    db.execute(schema).await;
    db
}

const USERS_SCHEMA: &str = r#"
    CREATE TABLE users (
        username TEXT NOT NULL,
        password TEXT,
        salt TEXT,
        email TEXT,
        role TEXT,
        age INTEGER,
        score REAL
    )
"#;

/// Insert a test user.
async fn insert_user(
    db: &TestDb,
    username: &str,
    password: &str,
    salt: Option<&str>,
    email: Option<&str>,
    role: Option<&str>,
) {
    let mut conn = db.connect().await;
    sqlx::query("INSERT INTO users (username, password, salt, email, role) VALUES (?, ?, ?, ?, ?)")
        .bind(username)
        .bind(hash(password, salt.unwrap_or("")))
        .bind(salt)
        .bind(email)
        .bind(role)
        .execute(&mut conn)
        .await
        .expect("Failed to insert user");
    conn.close().await.unwrap();
}

async fn users_db() -> TestDb {
    let db = setup_test_db(USERS_SCHEMA).await;
    insert_user(&db, "alice", "wonderland", Some("s1"), Some("a@x.com"), None).await;
    insert_user(&db, "carol", "pw", Some("s3"), Some("c@x.com"), Some("admin")).await;
    insert_user(&db, "carol", "pw", Some("s3"), Some("c@x.com"), Some("viewer")).await;
    db
}

fn values(attrs: &crate::AttributeSet, name: &str) -> Vec<String> {
    attrs.get(name).map(<[String]>::to_vec).unwrap_or_default()
}

#[tokio::test]
async fn test_connect_sqlite() {
    let db = users_db().await;
    let source = db.source();
    assert_eq!(source.database_type(), DriverFamily::Sqlite);
    assert_eq!(
        source.lookup_sql(),
        "SELECT * FROM \"users\" WHERE \"username\" = ?"
    );
}

#[tokio::test]
async fn test_login_valid_password() {
    let db = users_db().await;
    let source = db.source();

    let attrs = source.login("alice", "wonderland").await.unwrap();

    assert_eq!(values(&attrs, "email"), ["a@x.com"]);
    assert_eq!(values(&attrs, "username"), ["alice"]);
    assert_eq!(values(&attrs, "salt"), ["s1"]);
    assert!(!attrs.contains("role"), "null role must not appear");
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_login_unknown_user() {
    let db = users_db().await;
    let source = db.source();

    let result = source.login("bob", "anything").await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_login_wrong_password() {
    let db = users_db().await;
    let source = db.source();

    let wrong = source.login("alice", "looking-glass").await.unwrap_err();
    let unknown = source.login("bob", "looking-glass").await.unwrap_err();

    assert_eq!(wrong.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(wrong.kind(), unknown.kind());
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[tokio::test]
async fn test_multi_row_user() {
    let db = users_db().await;
    let source = db.source();

    let attrs = source.login("carol", "pw").await.unwrap();

    assert_eq!(values(&attrs, "role"), ["admin", "viewer"]);
    assert_eq!(values(&attrs, "email"), ["c@x.com"], "duplicates collapse");
    assert_eq!(values(&attrs, "username"), ["carol"]);
}

#[tokio::test]
async fn test_numbers_are_stringified() {
    let db = users_db().await;
    db.execute("UPDATE users SET age = 30, score = 1.5 WHERE username = 'alice'")
        .await;
    let source = db.source();

    let attrs = source.login("alice", "wonderland").await.unwrap();
    assert_eq!(values(&attrs, "age"), ["30"]);
    assert_eq!(values(&attrs, "score"), ["1.5"]);
}

#[tokio::test]
async fn test_login_is_idempotent() {
    let db = users_db().await;
    let source = db.source();

    let first = source.login("carol", "pw").await.unwrap();
    let second = source.login("carol", "pw").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_salt_column() {
    let db = setup_test_db("CREATE TABLE users (username TEXT, password TEXT, email TEXT)").await;
    db.execute("INSERT INTO users VALUES ('erin', 'x', 'e@x.com')")
        .await;
    let source = db.source();

    let err = source.login("erin", "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(err.to_string().contains("'salt'"));
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_missing_salt_column_unknown_user_is_invalid() {
    let db = setup_test_db("CREATE TABLE users (username TEXT, password TEXT)").await;
    let source = db.source();

    let err = source.login("nobody", "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[tokio::test]
async fn test_null_salt_is_empty_salt() {
    let db = users_db().await;
    insert_user(&db, "frank", "nosalt", None, None, None).await;
    let source = db.source();

    let attrs = source.login("frank", "nosalt").await.unwrap();
    assert!(!attrs.contains("salt"));
}

#[tokio::test]
async fn test_null_password_never_matches() {
    let db = users_db().await;
    db.execute("INSERT INTO users (username, password, salt) VALUES ('gina', NULL, 's')")
        .await;
    let source = db.source();

    let err = source.login("gina", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[tokio::test]
async fn test_empty_credentials_are_ordinary() {
    let db = users_db().await;
    insert_user(&db, "", "", Some("s0"), Some("anon@x.com"), None).await;
    let source = db.source();

    let attrs = source.login("", "").await.unwrap();
    assert_eq!(values(&attrs, "email"), ["anon@x.com"]);

    let err = source.login("", "not-empty").await.unwrap_err();
    assert!(err.is_invalid_credentials());
}

#[tokio::test]
async fn test_username_is_bound_not_interpolated() {
    let db = users_db().await;
    let source = db.source();

    let err = source.login("' OR '1'='1", "wonderland").await.unwrap_err();
    assert!(err.is_invalid_credentials());
}

#[tokio::test]
async fn test_case_sensitivity_is_configurable() {
    let db = setup_test_db(
        "CREATE TABLE users (username TEXT COLLATE NOCASE, password TEXT, salt TEXT, email TEXT, role TEXT)",
    )
    .await;
    insert_user(&db, "alice", "wonderland", Some("s1"), Some("a@x.com"), None).await;

    let collation = db.source();
    let attrs = collation.login("ALICE", "wonderland").await.unwrap();
    assert_eq!(values(&attrs, "username"), ["alice"]);

    let exact = db.source_with(|c| c.case_sensitive_username(true));
    let err = exact.login("ALICE", "wonderland").await.unwrap_err();
    assert!(err.is_invalid_credentials());
    exact.login("alice", "wonderland").await.unwrap();
}

#[tokio::test]
async fn test_custom_username_column() {
    let db = setup_test_db("CREATE TABLE accounts (login TEXT, password TEXT, salt TEXT, mail TEXT)").await;
    let mut conn = db.connect().await;
    sqlx::query("INSERT INTO accounts VALUES (?, ?, ?, ?)")
        .bind("hank")
        .bind(hash("pw", "s"))
        .bind("s")
        .bind("h@x.com")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    let config = SourceConfig::new(&db.dsn, "", "", "accounts", ALGORITHM).username_column("login");
    let source = AuthSourceSql::new("test-sql", config).unwrap();

    let attrs = source.login("hank", "pw").await.unwrap();
    assert_eq!(values(&attrs, "mail"), ["h@x.com"]);
}

#[tokio::test]
async fn test_typed_columns_are_stringified() {
    let db = setup_test_db(
        r#"
        CREATE TABLE users (
            username TEXT NOT NULL,
            password TEXT,
            salt TEXT,
            created_at DATETIME,
            active BOOLEAN,
            balance NUMERIC,
            born DATE,
            avatar BLOB
        )
    "#,
    )
    .await;

    let mut conn = db.connect().await;
    sqlx::query(
        "INSERT INTO users (username, password, salt, created_at, active, balance, born, avatar) \
         VALUES (?, ?, ?, '2024-01-02 03:04:05', 1, 12.5, '1990-05-17', X'6869')",
    )
    .bind("ivy")
    .bind(hash("pw", "s9"))
    .bind("s9")
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO users (username, password, salt, created_at, active, balance, born) \
         VALUES (?, ?, ?, '2024-02-03 04:05:06', 0, 7, NULL)",
    )
    .bind("ivy")
    .bind(hash("pw", "s9"))
    .bind("s9")
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();

    let source = db.source();
    let attrs = source.login("ivy", "pw").await.unwrap();
    assert_eq!(
        values(&attrs, "created_at"),
        ["2024-01-02 03:04:05", "2024-02-03 04:05:06"]
    );
    assert_eq!(values(&attrs, "active"), ["1", "0"]);
    assert_eq!(values(&attrs, "balance"), ["12.5", "7"]);
    assert_eq!(values(&attrs, "born"), ["1990-05-17"]);
    assert_eq!(values(&attrs, "avatar"), ["hi"]);

    let err = source.login("ivy", "bad").await.unwrap_err();
    assert!(err.is_invalid_credentials());
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_missing_table_is_query_failed() {
    let db = users_db().await;
    let source = db.source_with(|c| SourceConfig {
        table: "no_such_table".into(),
        ..c
    });

    let err = source.login("alice", "wonderland").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert!(err.to_string().contains("failed to execute query"));
    assert!(err.to_string().contains("no_such_table"));
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_unreachable_database() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!(
        "sqlite:{}?mode=ro",
        dir.path().join("absent").join("users.db").display()
    );
    let source = AuthSourceSql::new("test-sql", SourceConfig::new(dsn, "", "", "users", ALGORITHM))
        .unwrap();

    for _ in 0..3 {
        let err = source.login("alice", "wonderland").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.is_operational());
        assert_eq!(source.open_connections(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins() {
    let db = users_db().await;
    let source = Arc::new(db.source());

    let mut handles = Vec::new();
    for i in 0..16 {
        let source = Arc::clone(&source);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                source.login("carol", "pw").await.map(|a| a.len())
            } else {
                source.login("carol", "nope").await.map(|a| a.len())
            }
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        if i % 2 == 0 {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }
    }
    assert_eq!(source.open_connections(), 0);
}

#[tokio::test]
async fn test_trait_object() {
    let db = users_db().await;
    let auth: Arc<dyn UserPassAuth> = Arc::new(db.source());

    let attrs = auth.login("alice", "wonderland").await.unwrap();
    assert_eq!(values(&attrs, "email"), ["a@x.com"]);
}

#[tokio::test]
async fn test_from_value() {
    let db = users_db().await;
    let value = json!({
        "dsn": db.dsn,
        "username": "",
        "password": "",
        "table_user_name": "users",
        "hash": ALGORITHM,
    });
    let source = AuthSourceSql::from_value("from-value", &value).unwrap();
    assert_eq!(source.auth_id(), "from-value");
    source.login("alice", "wonderland").await.unwrap();
}

#[test]
fn test_construction_errors() {
    let base = || SourceConfig::new("sqlite:users.db", "", "", "users", ALGORITHM);

    let err = AuthSourceSql::new("bad", SourceConfig { hash: "rot13".into(), ..base() }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("rot13"));

    let err = AuthSourceSql::new("bad", SourceConfig { table: "a..b".into(), ..base() }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = AuthSourceSql::new(
        "bad",
        SourceConfig {
            dsn: "mysql:host=db;port=http".into(),
            ..base()
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
