//! HTTP surface, mounted under `/api`.
//!
//! ```text
//! GET /api/keygen/<user_id>/<scheme>/<client_participant_id>      -> {"roomId", "keygenId"}
//! GET /api/sign/<user_id>/<scheme>/<message>/<derivation_path>    -> {"roomId"}
//! GET /api/check-exists/<user_id>/<scheme>                        -> 200 or 400
//! ```
use std::path::PathBuf;

use rocket::{
    catch, catchers,
    fairing::{Fairing, Info, Kind},
    get, options, routes,
    serde::json::Json,
    Build, Request, Response, Rocket, State,
};
use tracing::{info, warn};

use crate::{
    error::{Error, ErrorBody},
    scheme::{DerivationPath, ParseError, Scheme},
    session::{KeygenHandshake, SessionService, SignHandshake},
};

impl<'a> rocket::request::FromParam<'a> for Scheme {
    type Error = ParseError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

impl<'a> rocket::request::FromParam<'a> for DerivationPath {
    type Error = ParseError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

fn invalid(e: ParseError) -> Error {
    Error::InvalidRequest(e.to_string())
}

#[get("/keygen/<user_id>/<scheme>/<client_participant_id>")]
async fn keygen(
    service: &State<SessionService>,
    user_id: &str,
    scheme: Result<Scheme, ParseError>,
    client_participant_id: &str,
) -> Result<Json<KeygenHandshake>, Error> {
    let scheme = scheme.map_err(invalid)?;
    let handshake = service
        .start_keygen(user_id, scheme, client_participant_id)
        .await?;
    Ok(Json(handshake))
}

#[get("/sign/<user_id>/<scheme>/<message>/<derivation_path>")]
async fn sign(
    service: &State<SessionService>,
    user_id: &str,
    scheme: Result<Scheme, ParseError>,
    message: &str,
    derivation_path: Result<DerivationPath, ParseError>,
) -> Result<Json<SignHandshake>, Error> {
    let scheme = scheme.map_err(invalid)?;
    let path = derivation_path.map_err(invalid)?;
    let handshake = service.start_sign(user_id, scheme, message, path).await?;
    Ok(Json(handshake))
}

#[get("/check-exists/<user_id>/<scheme>")]
fn check_exists(
    service: &State<SessionService>,
    user_id: &str,
    scheme: Result<Scheme, ParseError>,
) -> Result<(), Error> {
    let scheme = scheme.map_err(invalid)?;
    service.check_exists(user_id, scheme)
}

#[options("/<_route_args..>")]
fn preflight(_route_args: Option<PathBuf>) {}

fn error_body(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        error: message.to_string(),
    })
}

#[catch(400)]
fn bad_request(req: &Request) -> Json<ErrorBody> {
    warn!(uri = %req.uri(), "bad request");
    error_body("bad request")
}

#[catch(404)]
fn not_found(req: &Request) -> Json<ErrorBody> {
    warn!(uri = %req.uri(), "no such route");
    error_body(&format!("'{}' is not a valid path", req.uri()))
}

#[catch(422)]
fn unprocessable_entity(req: &Request) -> Json<ErrorBody> {
    warn!(uri = %req.uri(), "unprocessable request");
    error_body("unprocessable request")
}

#[catch(500)]
fn internal_error(req: &Request) -> Json<ErrorBody> {
    tracing::error!(uri = %req.uri(), "internal server error");
    error_body("internal server error")
}

/// Allows the browser client to call the API cross origin.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_raw_header("Access-Control-Allow-Origin", "*");
        res.set_raw_header("Access-Control-Allow-Methods", "GET, OPTIONS");
        res.set_raw_header("Access-Control-Allow-Headers", "*");
    }
}

pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request logger",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        info!(
            method = %req.method(),
            uri = %req.uri(),
            status = res.status().code,
            "request handled"
        );
    }
}

/// Assemble the server around `service`. The caller launches it.
pub fn build(service: SessionService) -> Rocket<Build> {
    rocket::build()
        .manage(service)
        .mount("/api", routes![keygen, sign, check_exists])
        .mount("/", routes![preflight])
        .register(
            "/",
            catchers![bad_request, not_found, unprocessable_entity, internal_error],
        )
        .attach(Cors)
        .attach(RequestLogger)
}
