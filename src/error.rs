use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Rendering the metrics failed: {0}")]
    Render(#[from] prometheus::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self, "Failed to serve scrape");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
