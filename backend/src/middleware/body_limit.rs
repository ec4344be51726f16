use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::CONTENT_LENGTH,
    Error, HttpResponse,
};
use futures::future::{ok, Ready};
use shared::ErrorResponse;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "File too large. Maximum size is 5 MB.";

/// Rejects requests whose declared Content-Length exceeds `max_bytes`
/// before any handler reads the body.
#[derive(Clone)]
pub struct BodyLimit {
    max_bytes: usize,
}

impl BodyLimit {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BodyLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = BodyLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(BodyLimitService {
            service: Rc::new(service),
            max_bytes: self.max_bytes,
        })
    }
}

pub struct BodyLimitService<S> {
    service: Rc<S>,
    max_bytes: usize,
}

fn declared_length(req: &ServiceRequest) -> Option<usize> {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl<S, B> Service<ServiceRequest> for BodyLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let max_bytes = self.max_bytes;

        Box::pin(async move {
            match declared_length(&req) {
                Some(len) if len > max_bytes => {
                    log::warn!(
                        "Rejecting {} {}: Content-Length {} exceeds {} bytes",
                        req.method(),
                        req.path(),
                        len,
                        max_bytes
                    );
                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::PayloadTooLarge()
                        .json(ErrorResponse::new(PAYLOAD_TOO_LARGE_MESSAGE))
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
                _ => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}
