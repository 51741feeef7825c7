use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ColumnConstraint, ContentArrangement, Table, Width,
};
use formentry_cli::commands::ProcessResult;
use formentry_core::QueueStatus;
use formentry_model::{ErrorEntry, QueueEntry};

pub fn print_process_summary(result: &ProcessResult) {
    if result.skipped {
        println!("Another drain is in progress; nothing was processed.");
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Outcome"),
        header_cell("This run"),
        header_cell("Total"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    align_column(&mut table, 2, CellAlignment::Right);
    table.add_row(vec![
        label_cell("Archived"),
        count_cell(result.archived, Color::Green),
        Cell::new(result.status.archived),
    ]);
    table.add_row(vec![
        label_cell("Errored"),
        count_cell(result.errored, Color::Red),
        Cell::new(result.status.errored),
    ]);
    table.add_row(vec![
        label_cell("Still queued"),
        dim_cell("-"),
        count_cell(result.status.queued, Color::Yellow),
    ]);
    println!("{table}");
    if let Some(failure) = &result.failure {
        eprintln!("Drain stopped: {failure}");
    }
}

pub fn print_status(status: &QueueStatus) {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Queue"), header_cell("Entries")]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    table.add_row(vec![label_cell("Queued"), Cell::new(status.queued)]);
    table.add_row(vec![label_cell("Archived"), Cell::new(status.archived)]);
    table.add_row(vec![
        label_cell("Errored"),
        count_cell(status.errored, Color::Red),
    ]);
    println!("{table}");
}

pub fn print_enqueued(entries: &[QueueEntry]) {
    for entry in entries {
        println!("Queued entry {}", entry.id);
    }
}

pub fn print_queue(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("The queue is empty.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Id"),
        header_cell("Created"),
        header_cell("Bytes"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    align_column(&mut table, 2, CellAlignment::Right);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(entry.payload.len()),
        ]);
    }
    println!("{table}");
}

pub fn print_errors(entries: &[ErrorEntry]) {
    if entries.is_empty() {
        println!("The error bin is empty.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Id"),
        header_cell("Queue id"),
        header_cell("Summary"),
        header_cell("Detail"),
        header_cell("Created"),
        header_cell("Creator"),
    ]);
    apply_error_table_style(&mut table);
    align_column(&mut table, 0, CellAlignment::Right);
    align_column(&mut table, 1, CellAlignment::Right);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(entry.queue_entry_id),
            Cell::new(&entry.error_summary).fg(Color::Red),
            entry
                .error_detail
                .as_deref()
                .map_or_else(|| dim_cell("-"), Cell::new),
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            dim_cell(&entry.creator),
        ]);
    }
    println!("{table}");
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
}

fn apply_error_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(160);
    if table.column_count() >= 6 {
        table.set_constraints(vec![
            ColumnConstraint::LowerBoundary(Width::Fixed(4)),
            ColumnConstraint::LowerBoundary(Width::Fixed(8)),
            ColumnConstraint::UpperBoundary(Width::Percentage(30)),
            ColumnConstraint::UpperBoundary(Width::Percentage(40)),
            ColumnConstraint::LowerBoundary(Width::Fixed(19)),
            ColumnConstraint::UpperBoundary(Width::Fixed(22)),
        ]);
    }
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn label_cell(label: &str) -> Cell {
    Cell::new(label).add_attribute(Attribute::Bold)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
