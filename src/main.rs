// minidb - teaching-grade relational storage engine core
// Demo entry point: exercises the Facade against a scratch data directory.

use std::path::PathBuf;

use minidb::catalog::Column;
use minidb::format::{ColumnFormat, Value};
use minidb::facade::FacadePredicate;
use minidb::record::Comparator;
use minidb::{Config, Facade, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let config = Config {
        data_dir: std::env::args()
            .nth(1)
            .unwrap_or_else(|| "./data".to_string()),
        ..Config::default()
    };
    std::fs::create_dir_all(&config.data_dir)?;

    tracing::info!("opening data directory {}", config.data_dir);
    let facade = Facade::open(PathBuf::from(&config.data_dir), config.pool_config())?;

    let columns = vec![
        Column { name: "id".into(), format: ColumnFormat::Int },
        Column { name: "name".into(), format: ColumnFormat::Str(16) },
    ];
    if facade.select_all("people").is_err() {
        facade.create_table("people", columns, "id")?;
        facade.insert("people", vec![Value::Int(1), Value::Str("ada".into())])?;
        facade.insert("people", vec![Value::Int(2), Value::Str("grace".into())])?;
        tracing::info!("seeded table 'people' with 2 rows");
    }

    let rows = facade.select_all("people")?;
    println!("people:");
    for row in &rows {
        println!("  {row:?}");
    }

    let found = facade.select_where(
        "people",
        &FacadePredicate::and(vec![("id".into(), Comparator::Eq, Value::Int(1))]),
    )?;
    println!("people where id = 1: {found:?}");

    facade.quit()?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn print_banner() {
    println!("╔══════════════════════════════════════════╗");
    println!("║  minidb - storage engine core demo        ║");
    println!("╚══════════════════════════════════════════╝");
    println!();
}
