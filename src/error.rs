use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connection failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("connect superseded by a newer connect or disconnect")]
    Superseded,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status code {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("no peer selected")]
    NoPeerSelected,
    #[error("message content is empty")]
    EmptyContent,
    #[error("history fetch failed: {0}")]
    History(#[from] ServiceError),
}
