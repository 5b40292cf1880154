// kintone-mirror/src/sync/progress.rs
use std::io::{Write, stdout};

use super::logic::ReconcileStats;
use crate::store::Application;
use crate::utils::format_count;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Page,
    Insert,
    Update,
    Delete,
}

impl Marker {
    fn symbol(self) -> char {
        match self {
            Marker::Page => '.',
            Marker::Insert => 'I',
            Marker::Update => 'U',
            Marker::Delete => 'D',
        }
    }
}

/// Operator-facing progress on stdout. Purely informational.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    enabled: bool,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn app_started(&self, app: &Application, total_count: u64) {
        if self.enabled {
            println!("🔄 {}\t{} records", app.name, format_count(total_count));
        }
    }

    pub fn mark(&self, marker: Marker) {
        if self.enabled {
            print!("{}", marker.symbol());
            let _ = stdout().flush();
        }
    }

    pub fn app_finished(&self, app: &Application, stats: &ReconcileStats) {
        if self.enabled {
            println!();
            println!(
                "✓ {} [{}]: {} inserted, {} updated, {} deleted, {} unchanged",
                app.name,
                app.id,
                format_count(stats.inserted),
                format_count(stats.updated),
                format_count(stats.deleted),
                format_count(stats.unchanged)
            );
        }
    }
}
