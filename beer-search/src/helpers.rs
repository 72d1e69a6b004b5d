use hyper::{Body, Request, Response};
use routerify::ext::RequestExt;
use serde::de::DeserializeOwned;

use crate::error::{Result, ServerError};
use crate::state::State;

pub type BeerRequest = Request<Body>;
pub type BeerResponse = Result<Response<Body>>;

#[macro_export]
macro_rules! bad_request {
    ($($arg:tt)*) => {{
        Err($crate::error::ServerError::BadRequest(format!($($arg)*)))
    }}
}

/// Gets the shared server state attached to the router.
pub fn get_state(req: &BeerRequest) -> Result<&State> {
    req.data::<State>()
        .ok_or_else(|| ServerError::Other(anyhow::Error::msg("server state missing from router")))
}

/// Reads the whole body and parses it as JSON, a malformed body is a bad request.
pub async fn read_json<T: DeserializeOwned>(req: &mut BeerRequest) -> Result<T> {
    let body = hyper::body::to_bytes(req.body_mut()).await?;

    match serde_json::from_slice(&body) {
        Ok(value) => Ok(value),
        Err(e) => bad_request!("failed to parse request body: {}", e),
    }
}
