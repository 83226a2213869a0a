use crate::errors::Result;
use crate::model::{AlertReadingRow, AlertState, Device};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Storage for devices, their readings and their alerts.
///
/// Implementations:
/// - [`crate::db::PgReadingStore`] - PostgreSQL via sqlx
/// - [`crate::memory::MemoryStore`] - in-process, used for local runs and tests
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Devices with at least one unprocessed reading, ordered by serial
    /// number ascending and limited to `batch_size`.
    ///
    /// Each device carries all of its alerts and only its unprocessed
    /// readings. Never mutates anything.
    async fn devices_with_unprocessed_readings(&self, batch_size: usize) -> Result<Vec<Device>>;

    /// Persist the alert set and reading processed-markers of every device
    /// in a single transaction.
    ///
    /// Either everything is written or nothing is. If `cancel` fires before
    /// the commit boundary the transaction is abandoned and
    /// [`crate::errors::Error::Canceled`] is returned.
    async fn commit(&self, devices: &[Device], cancel: &CancellationToken) -> Result<()>;

    /// Stream every alert of the device (optionally only those in `state`)
    /// joined with every reading ever recorded for that device.
    ///
    /// Alerts of a device without readings still yield one row with
    /// `reading: None`.
    fn alert_readings<'a>(
        &'a self,
        serial_number: &'a str,
        state: Option<AlertState>,
    ) -> BoxStream<'a, Result<AlertReadingRow>>;
}
