use hyper::{Body, Response, StatusCode};
use routerify::RouteError;

use crate::error::ServerError;
use crate::helpers::{BeerRequest, BeerResponse};
use crate::responders::json_response;

pub async fn handle_404(_req: BeerRequest) -> BeerResponse {
    json_response(404, "No route matched for path.")
}

pub async fn handle_405(_req: BeerRequest) -> BeerResponse {
    Err(ServerError::MethodNotAllowed)
}

pub async fn error_handler(err: RouteError) -> Response<Body> {
    let (status, message) = match err.downcast_ref::<ServerError>() {
        Some(e) => (e.status(), e.to_string()),
        None => (500, err.to_string()),
    };

    if status >= 500 {
        error!("request failed with status {}: {}", status, message);
    } else {
        debug!("request rejected with status {}: {}", status, message);
    }

    match json_response(status, &message) {
        Ok(resp) => resp,
        Err(e) => {
            error!("failed to render error response: {:?}", e);
            let mut resp = Response::new(Body::from("Internal Server Error"));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        },
    }
}
