//! Rendering of command results

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Bordered table
    #[default]
    Table,
    Json,
    Yaml,
    /// `Header: value` lines, records separated by `---`
    Plain,
}

/// A record that knows its column headings and cell values
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Render records in the requested format
pub fn render<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                return "No entries.".to_string();
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(items)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
        OutputFormat::Plain => {
            if items.is_empty() {
                return "No entries.".to_string();
            }
            items
                .iter()
                .map(|item| {
                    T::headers()
                        .iter()
                        .zip(item.row())
                        .map(|(h, v)| format!("{}: {}", h, v))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect::<Vec<_>>()
                .join("\n---\n")
        }
    }
}

/// Print one record; JSON and YAML emit an object rather than a list
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item).unwrap_or_default()),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item).unwrap_or_default()),
        _ => println!("{}", render(std::slice::from_ref(item), format)),
    }
}

pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    println!("{}", render(items, format));
}

pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
