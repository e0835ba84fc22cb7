//! Tests for the notification store.
//!
//! The [`run_test`] function sets up a scratch Postgres cluster and gives
//! your callback a connection pool to interact with. The general form of a
//! test is:
//!
//! ```rust
//! #[test]
//! fn example() {
//!     run_test(|pool| async move {
//!         let mut conn = pool.connection().await.unwrap();
//!         // Call methods on `conn` and verify the behavior.
//!     });
//! }
//! ```
//!
//! Postgres has to be installed for these tests to run; elsewhere they are
//! skipped (CI is expected to have it).

use futures::Future;
use remindbot::db::Pool;
use std::path::{Path, PathBuf};
use std::process::Command;

mod notifications;

const TEST_TABLE_PREFIX: &str = "remindbot_";

struct PgContext {
    db_dir: PathBuf,
}

impl Drop for PgContext {
    fn drop(&mut self) {
        stop_postgres(&self.db_dir);
    }
}

fn run_test<F, Fut>(f: F)
where
    F: Fn(Pool) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let Some(db_dir) = setup_postgres() else {
        if std::env::var_os("CI").is_some() {
            panic!("postgres must be installed in CI");
        }
        eprintln!("skipping test: postgres not installed");
        return;
    };
    let ctx = PgContext { db_dir };
    let pool = Pool::open(&postgres_database_url(&ctx.db_dir), TEST_TABLE_PREFIX);
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async move { f(pool).await });
}

fn postgres_database_url(db_dir: &Path) -> String {
    format!(
        "postgres:///remindbot?user=remindbot&host={}",
        db_dir.display()
    )
}

fn setup_postgres() -> Option<PathBuf> {
    let pg_dir = find_postgres()?;
    // Set up a directory where this test can store all its stuff.
    let test_dir = super::test_dir();
    let db_dir = test_dir.join("db");

    std::fs::create_dir(&db_dir).unwrap();
    let db_dir_str = db_dir.to_str().unwrap();
    run_command(
        &pg_dir.join("initdb"),
        &["--auth=trust", "--username=remindbot", "-D", db_dir_str],
        &db_dir,
    );
    run_command(
        &pg_dir.join("pg_ctl"),
        &[
            // -h '' tells it to not listen on TCP
            // -k tells it where to place the unix-domain socket
            "-o",
            &format!("-h '' -k {db_dir_str}"),
            // -D is the data dir where everything is stored
            "-D",
            db_dir_str,
            // -l enables logging to a file instead of stdout
            "-l",
            db_dir.join("postgres.log").to_str().unwrap(),
            "start",
        ],
        &db_dir,
    );
    run_command(
        &pg_dir.join("createdb"),
        &["--user", "remindbot", "-h", db_dir_str, "remindbot"],
        &db_dir,
    );
    Some(db_dir)
}

fn stop_postgres(db_dir: &Path) {
    let pg_dir = find_postgres().unwrap();
    match Command::new(pg_dir.join("pg_ctl"))
        .args(["-D", db_dir.to_str().unwrap(), "stop"])
        .output()
    {
        Ok(output) => {
            if !output.status.success() {
                eprintln!(
                    "failed to stop postgres:\n\
                    ---stdout\n\
                    {}\n\
                    ---stderr\n\
                    {}\n\
                    ",
                    std::str::from_utf8(&output.stdout).unwrap(),
                    std::str::from_utf8(&output.stderr).unwrap()
                );
            }
        }
        Err(e) => eprintln!("could not run pg_ctl to stop: {e}"),
    }
}

/// Finds the root for PostgreSQL commands.
///
/// For various reasons, some Linux distros hide some postgres commands and
/// don't put them on PATH, making them difficult to access.
fn find_postgres() -> Option<PathBuf> {
    // Check if on PATH first.
    if let Ok(o) = Command::new("initdb").arg("-V").output() {
        if o.status.success() {
            return Some(PathBuf::new());
        }
    }
    if let Ok(dirs) = std::fs::read_dir("/usr/lib/postgresql") {
        let mut versions: Vec<_> = dirs
            .filter_map(|entry| {
                let entry = entry.unwrap();
                // Versions are generally of the form 9.3 or 14, but this
                // might be broken if other forms are used.
                if let Ok(n) = entry.file_name().to_str().unwrap().parse::<f32>() {
                    Some((n, entry.path()))
                } else {
                    None
                }
            })
            .collect();
        if !versions.is_empty() {
            versions.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            return Some(versions.last().unwrap().1.join("bin"));
        }
    }
    None
}

fn run_command(command: &Path, args: &[&str], cwd: &Path) {
    eprintln!("running {command:?}: {args:?}");
    let output = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap_or_else(|e| panic!("`{command:?}` failed to run: {e}"));
    if !output.status.success() {
        panic!(
            "{command:?} failed:\n\
            ---stdout\n\
            {}\n\
            ---stderr\n\
            {}\n\
            ",
            std::str::from_utf8(&output.stdout).unwrap(),
            std::str::from_utf8(&output.stderr).unwrap(),
        );
    }
}
