use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("ip address already in use")]
    IpAddressInUse,

    #[error("mac address already in use")]
    MacAddressInUse,

    #[error("gateway agent error: {0}")]
    Agent(String),

    #[error("no gateway available in availability zone {0}")]
    NoGateway(String),

    #[error("cloud api error: {0}")]
    Api(String),

    #[error("service catalog error: {0}")]
    ServiceCatalog(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DriverError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        DriverError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound { .. })
    }

    /// Conflicts that make port re-creation worth retrying.
    pub fn is_address_conflict(&self) -> bool {
        matches!(
            self,
            DriverError::IpAddressInUse | DriverError::MacAddressInUse
        )
    }
}
