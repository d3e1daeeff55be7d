use anyhow::Result;
use remora::db::CommandStore;
use remora::paths;

pub fn execute(query: &str, limit: usize) -> Result<()> {
    let store = CommandStore::open(paths::history_db_path())?;
    let results = store.search_commands(query, limit)?;

    if results.is_empty() {
        println!("No matches for '{query}'");
        return Ok(());
    }

    for record in results {
        println!(
            "{}  [{:>3}]  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.exit_code,
            record.command
        );
    }
    Ok(())
}
