//! HTTP API for ingestion, match queries and the live feed.

mod api;
mod error;
mod handlers;
#[allow(clippy::module_inception)]
mod server;
mod state;

pub use api::{
    CloseResponse, EventsQuery, IngestLineRequest, IngestRequest, IngestResponse, ListQuery,
    NicknamesRequest, PageQuery, ReplayRequest, StatusResponse, MAX_PAGE_LIMIT,
};
pub use error::{ApiError, ErrorBody, ServerError};
pub use handlers::UPLOAD_FIELD;
pub use server::RecorderServer;
pub use state::AppState;
