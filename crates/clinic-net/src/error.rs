use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Transport command channel closed")]
    TransportClosed,
}
