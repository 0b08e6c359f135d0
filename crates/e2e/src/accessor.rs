//! Indexed access to a row whose rendered set may have been reset

use std::time::Duration;

use coa_common::config::RowConfig;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::page::RowTable;
use crate::probe::Probe;

/// A row that is rendered and scrolled into view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedRow {
    pub index: usize,
}

/// Makes row `i` available, re-probing when a reload truncated the table
pub struct RowAccessor<'a> {
    attempts: usize,
    settle: Duration,
    probe: &'a dyn Probe,
}

impl<'a> RowAccessor<'a> {
    pub fn new(config: &RowConfig, probe: &'a dyn Probe) -> Self {
        Self {
            attempts: config.access_attempts,
            settle: config.access_settle(),
            probe,
        }
    }

    pub async fn locate(&self, table: &dyn RowTable, index: usize) -> E2eResult<LocatedRow> {
        let mut probes = 0;
        loop {
            let rendered = table.row_count().await?;
            if index < rendered {
                table.scroll_row_into_view(index).await?;
                return Ok(LocatedRow { index });
            }
            if probes >= self.attempts {
                return Err(E2eError::RowUnavailable {
                    index,
                    attempts: probes,
                    rendered,
                });
            }

            debug!(
                "Row {} not rendered yet ({} rendered); probe {}/{}",
                index,
                rendered,
                probes + 1,
                self.attempts
            );
            if let Err(e) = self.probe.probe(table, rendered).await {
                warn!("Probe for row {} failed: {}", index, e);
            }
            probes += 1;
            sleep(self.settle).await;
        }
    }
}
