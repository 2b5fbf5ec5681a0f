use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone)]
pub enum Error {
    LoginError(String),
    ApiError(String),
    UnexpectedApiResponse,
    InvalidResponse(String, String),
    RateExceeded(String),
    /// Cloud answered `result: 10000`; the session token has to be renewed.
    TokenExpired,
    NotReady,
    NoPlant,
    NoMainControlDevice,
    UnknownEntity(String),
    UnknownDevice(String),
    InvalidRequest(String),
    FormatError,
    InternalError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoginError(s) => write!(f, "login failed: {}", s),
            Error::ApiError(s) => write!(f, "API error: {}", s),
            Error::UnexpectedApiResponse => write!(f, "unexpected API response"),
            Error::InvalidResponse(body, reason) => {
                write!(f, "invalid API response ({}): {}", reason, body)
            }
            Error::RateExceeded(s) => write!(f, "rate exceeded: {}", s),
            Error::TokenExpired => write!(f, "session token expired"),
            Error::NotReady => write!(f, "cloud connection not ready"),
            Error::NoPlant => write!(f, "no plant found for this account"),
            Error::NoMainControlDevice => write!(f, "no main control device"),
            Error::UnknownEntity(id) => write!(f, "unknown entity: {}", id),
            Error::UnknownDevice(sn) => write!(f, "unknown device: {}", sn),
            Error::InvalidRequest(s) => write!(f, "invalid request: {}", s),
            Error::FormatError => write!(f, "format error"),
            Error::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = match self {
            Error::RateExceeded(_) => Status::TooManyRequests,
            Error::LoginError(_) => Status::Forbidden,
            Error::NotReady | Error::TokenExpired => Status::ServiceUnavailable,
            Error::UnknownEntity(_) | Error::UnknownDevice(_) => Status::NotFound,
            Error::InvalidRequest(_) | Error::NoMainControlDevice => Status::BadRequest,
            Error::ApiError(_) | Error::InvalidResponse(_, _) | Error::UnexpectedApiResponse => {
                Status::BadGateway
            }
            _ => Status::InternalServerError,
        };
        let body = serde_json::json!({ "error": self.to_string() }).to_string();

        Response::build()
            .status(status)
            .sized_body(body.len(), Cursor::new(body))
            .header(ContentType::JSON)
            .ok()
    }
}
