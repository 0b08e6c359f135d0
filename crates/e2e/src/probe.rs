//! Strategies for asking a lazily loaded table for more rows

use async_trait::async_trait;
use coa_common::ProbeKind;
use tracing::debug;

use crate::error::E2eResult;
use crate::page::RowTable;

/// Scroll distance used when there is no rendered row to aim at
const EMPTY_TABLE_SCROLL: i64 = 600;

/// Triggers the table's "load more" behaviour
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue one probe given the currently rendered row count
    async fn probe(&self, table: &dyn RowTable, rendered: usize) -> E2eResult<()>;
}

/// Hover the last rendered row and scroll it into view
#[derive(Debug, Clone, Copy, Default)]
pub struct LastRowIntoView;

#[async_trait]
impl Probe for LastRowIntoView {
    fn name(&self) -> &'static str {
        "last_row_into_view"
    }

    async fn probe(&self, table: &dyn RowTable, rendered: usize) -> E2eResult<()> {
        if rendered == 0 {
            debug!("No rows rendered; scrolling table by {}px", EMPTY_TABLE_SCROLL);
            return table.scroll_table_by(EMPTY_TABLE_SCROLL).await;
        }
        let last = rendered - 1;
        table.hover_row(last).await?;
        table.scroll_row_into_view(last).await
    }
}

/// Scroll the table container by a fixed distance
#[derive(Debug, Clone, Copy)]
pub struct ScrollBy {
    pub pixels: i64,
}

#[async_trait]
impl Probe for ScrollBy {
    fn name(&self) -> &'static str {
        "scroll_by"
    }

    async fn probe(&self, table: &dyn RowTable, _rendered: usize) -> E2eResult<()> {
        table.scroll_table_by(self.pixels).await
    }
}

/// Build the configured strategy
pub fn from_kind(kind: &ProbeKind) -> Box<dyn Probe> {
    match kind {
        ProbeKind::LastRowIntoView => Box::new(LastRowIntoView),
        ProbeKind::ScrollBy { pixels } => Box::new(ScrollBy { pixels: *pixels }),
    }
}
