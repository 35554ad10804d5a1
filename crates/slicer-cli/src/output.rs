//! Terminal rendering for partitions and checkpoints

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, CellAlignment, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use slicer::{CompletionMap, Partition};

/// Render partitions as a numbered table
pub fn partitions_table(partitions: &[Partition]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["#", "Table", "Column", "Low", "High", "Ids"]);

    for (index, partition) in partitions.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1).set_alignment(CellAlignment::Right),
            Cell::new(&partition.table),
            Cell::new(&partition.id_column),
            Cell::new(partition.low).set_alignment(CellAlignment::Right),
            Cell::new(partition.high).set_alignment(CellAlignment::Right),
            Cell::new(partition.span()).set_alignment(CellAlignment::Right),
        ]);
    }

    table
}

/// Partitions a checkpoint still lists as incomplete
pub fn remaining_partitions(completion: &CompletionMap) -> Vec<Partition> {
    completion.incomplete().cloned().collect()
}

/// Pretty-printed JSON for `--format json`
pub fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Spinner for the copy loop
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
