use thiserror::Error;

use campus_broker::BrokerError;
use campus_core::CoreError;
use campus_store::StoreError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
