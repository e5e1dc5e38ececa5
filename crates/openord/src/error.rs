#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("graph contains an edge with a missing endpoint: {from} -> {to}")]
    MissingEndpoint { from: String, to: String },
    #[error("edge {from} -> {to} has an invalid weight {weight} (weights must be non-negative)")]
    NegativeEdgeWeight { from: String, to: String, weight: f64 },
    #[error(
        "position ({x}, {y}) maps outside the density grid; increase `GridConfig::view_size`"
    )]
    OutsideViewport { x: f64, y: f64 },
    #[error("invalid layout options: {0}")]
    InvalidOptions(String),
    #[error("node is not part of the layout: {0}")]
    UnknownNode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
