use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::{Cause, Error, Kind, Separator};
use serde::{Deserialize, Serialize};

/// JSON body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

/// Maps an error to the HTTP status reported to clients, following the
/// innermost level that carries a kind.
pub fn status_for(err: &Error) -> StatusCode {
    match innermost_kind(err) {
        Kind::Invalid => StatusCode::BAD_REQUEST,
        Kind::NotFound => StatusCode::NOT_FOUND,
        Kind::Permission => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The deepest non-`Other` kind in the cause chain, or `Other`.
fn innermost_kind(err: &Error) -> Kind {
    let mut kind = err.own_kind();
    let mut level = err;
    while let Some(next) = level.cause().and_then(Cause::as_error) {
        if next.own_kind() != Kind::Other {
            kind = next.own_kind();
        }
        level = next;
    }
    kind
}

/// The client-facing message: the rendered error without its leading
/// operation label, on one line.
pub fn public_message(err: &Error, sep: &Separator) -> String {
    let rendered = err.render(sep);
    let text = match rendered.split_once(':') {
        Some((_, rest)) => rest,
        None => rendered.as_str(),
    };
    text.trim()
        .chars()
        .map(|c| if matches!(c, '\r' | '\n' | '\t') { ' ' } else { c })
        .collect()
}

/// An [`Error`] leaving the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);

        #[cfg(feature = "tracing")]
        if status.is_server_error() {
            tracing::error!("{}", self.0.render_debug(Separator::global()));
        } else {
            tracing::debug!("{}", self.0);
        }

        let body = ErrorResponse {
            code: status.as_u16(),
            message: public_message(&self.0, Separator::global()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::Op;

    #[test]
    fn statuses_follow_the_innermost_classification() {
        let wrapped = |kind| Error::wrap(Op::new("outer"), Error::new(kind));

        assert_eq!(status_for(&wrapped(Kind::Invalid)), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&wrapped(Kind::NotFound)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&wrapped(Kind::Permission)), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&wrapped(Kind::Duplicate)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&Error::new(Kind::Other)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn inner_classification_wins_over_outer() {
        let not_found = Error::builder()
            .op(Op::new("storage.lookup"))
            .kind(Kind::NotFound)
            .build();
        let outer = Error::builder()
            .op(Op::new("server.parse"))
            .kind(Kind::Invalid)
            .cause(not_found)
            .build();
        assert_eq!(status_for(&outer), StatusCode::NOT_FOUND);

        // An inner Internal failure is a server error even under Invalid.
        let internal = Error::builder()
            .kind(Kind::Invalid)
            .cause(Error::new(Kind::Internal))
            .build();
        assert_eq!(status_for(&internal), StatusCode::INTERNAL_SERVER_ERROR);

        // Unclassified inner levels leave the outer kind in charge.
        let plain = Error::builder()
            .kind(Kind::Permission)
            .cause(Error::builder().message("denied upstream").build())
            .build();
        assert_eq!(status_for(&plain), StatusCode::FORBIDDEN);
    }

    #[test]
    fn message_drops_the_op_and_flattens_whitespace() {
        let err = Error::builder()
            .op(Op::new("server.insert"))
            .kind(Kind::Invalid)
            .message("size must be\na non-negative\tinteger")
            .build();

        assert_eq!(
            public_message(&err, &Separator::default()),
            "invalid operation: size must be a non-negative integer"
        );
    }

    #[test]
    fn message_without_separator_is_kept_whole() {
        let err = Error::new(Kind::Internal);
        assert_eq!(public_message(&err, &Separator::default()), "internal error");
    }
}
