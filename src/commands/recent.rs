use anyhow::Result;
use remora::db::CommandStore;
use remora::paths;

pub fn execute(limit: usize) -> Result<()> {
    let store = CommandStore::open(paths::history_db_path())?;

    for record in store.get_recent_commands(limit)? {
        println!(
            "{}  [{:>3}]  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.exit_code,
            record.command
        );
    }
    Ok(())
}
