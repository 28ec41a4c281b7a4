use super::{Kind, Separator};
use crate::Token;
use std::borrow::Cow;
use std::sync::Arc;
use std::{error::Error as StdError, fmt};

#[cfg(debug_assertions)]
use std::backtrace::{Backtrace, BacktraceStatus};

/// Result alias used throughout the ledger.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Label of the operation that raised or wrapped an [`Error`].
///
/// By convention each operation declares its label once:
///
/// ```
/// use ledger::Op;
///
/// const OP: Op = Op::new("storage/memory.insert");
/// assert_eq!(OP.as_str(), "storage/memory.insert");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Op(Cow<'static, str>);

impl Op {
    pub const fn new(label: &'static str) -> Self {
        Self(Cow::Borrowed(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Op {
    fn from(label: String) -> Self {
        Self(Cow::Owned(label))
    }
}

impl From<&'static str> for Op {
    fn from(label: &'static str) -> Self {
        Self::new(label)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The underlying error wrapped by an [`Error`].
#[derive(Clone, Debug)]
pub enum Cause {
    /// A structured error raised by an inner layer.
    Error(Box<Error>),
    /// A plain message. Foreign causes decode to this variant after a
    /// round-trip through [`Error::to_bytes`].
    Message(String),
    /// Any other error value, e.g. a transport error from a client library.
    Foreign(Arc<dyn StdError + Send + Sync>),
}

impl Cause {
    /// Returns the wrapped structured error, if any.
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Cause::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Error(err) => fmt::Display::fmt(err, f),
            Cause::Message(msg) => f.write_str(msg),
            Cause::Foreign(err) => fmt::Display::fmt(err, f),
        }
    }
}

/// Structured ledger error.
///
/// Build one with [`Error::builder`], or use the [`Error::new`] and
/// [`Error::wrap`] shorthands:
///
/// ```
/// use ledger::{Error, Kind, Op, Separator};
///
/// let err = Error::builder()
///     .op(Op::new("Get"))
///     .kind(Kind::Io)
///     .message("network unreachable")
///     .build();
///
/// assert_eq!(err.render(&Separator::default()), "Get: I/O error: network unreachable");
///
/// // An outer layer adds context without reclassifying.
/// let outer = Error::wrap(Op::new("Read"), err);
/// assert_eq!(outer.kind(), Kind::Io);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Error {
    op: Option<Op>,
    kind: Kind,
    token: Option<Token>,
    cause: Option<Cause>,
    #[cfg(debug_assertions)]
    stack: Option<Arc<Backtrace>>,
}

impl Error {
    /// Starts building an error. Every field is optional.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// An error carrying only a kind.
    pub fn new(kind: Kind) -> Self {
        Self::builder().kind(kind).build()
    }

    /// Wraps `err` with the calling operation's label. The kind is left
    /// unset so the inner classification stays authoritative.
    pub fn wrap(op: Op, err: Error) -> Self {
        Self::builder().op(op).cause(err).build()
    }

    pub fn op(&self) -> Option<&Op> {
        self.op.as_ref()
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// The kind set on this level, without looking at the cause chain.
    pub const fn own_kind(&self) -> Kind {
        self.kind
    }

    /// The effective classification of this error.
    ///
    /// Returns the kind set on this level unless it is [`Kind::Other`], in
    /// which case the effective kind of the structured cause is returned.
    /// Non-structured causes are never classified.
    pub fn kind(&self) -> Kind {
        match (self.kind, &self.cause) {
            (Kind::Other, Some(Cause::Error(inner))) => inner.kind(),
            (kind, _) => kind,
        }
    }

    /// Reports whether this error, or any structured error in its cause
    /// chain, is classified as `kind`.
    pub fn matches(&self, kind: Kind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match &self.cause {
            Some(Cause::Error(inner)) => inner.matches(kind),
            _ => false,
        }
    }

    /// Renders the error chain using `sep` between nested structured errors.
    ///
    /// Fields within one level are joined by `": "`. Empty fields are
    /// omitted. A nested error omits its token when it equals its parent's
    /// and its kind when the parent already reports it. The captured stack
    /// is never included; see [`Error::render_debug`].
    pub fn render(&self, sep: &Separator) -> String {
        self.render_chain(sep, None)
    }

    /// Like [`Error::render`], followed by the stack captured at
    /// construction. Stacks are only captured in debug builds and only when
    /// backtraces are enabled through `RUST_BACKTRACE`.
    pub fn render_debug(&self, sep: &Separator) -> String {
        #[allow(unused_mut)]
        let mut out = self.render(sep);
        #[cfg(debug_assertions)]
        if let Some(stack) = &self.stack {
            if stack.status() == BacktraceStatus::Captured {
                out.push('\n');
                out.push_str(&stack.to_string());
            }
        }
        out
    }

    fn render_chain(&self, sep: &Separator, parent: Option<&Error>) -> String {
        let mut b = String::new();

        if let Some(op) = self.op.as_ref().filter(|op| !op.is_empty()) {
            pad(&mut b, ": ");
            b.push_str(op.as_str());
        }

        let parent_token = parent.and_then(|p| p.token.as_ref());
        if let Some(token) = self
            .token
            .as_ref()
            .filter(|t| !t.is_empty() && Some(*t) != parent_token)
        {
            pad(&mut b, ": ");
            b.push_str(token.as_str());
        }

        let kind = self.kind();
        if kind != Kind::Other && parent.is_none_or(|p| p.kind() != kind) {
            pad(&mut b, ": ");
            b.push_str(kind.as_str());
        }

        match &self.cause {
            Some(Cause::Error(inner)) => {
                let nested = inner.render_chain(sep, Some(self));
                if !nested.is_empty() {
                    pad(&mut b, sep.as_str());
                    b.push_str(&nested);
                }
            }
            Some(cause) => {
                let text = cause.to_string();
                if !text.is_empty() {
                    pad(&mut b, ": ");
                    b.push_str(&text);
                }
            }
            None => {}
        }

        b
    }
}

fn pad(b: &mut String, sep: &str) {
    if !b.is_empty() {
        b.push_str(sep);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(Separator::global()))
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.cause {
            Some(Cause::Error(inner)) => Some(inner.as_ref()),
            Some(Cause::Foreign(inner)) => Some(inner.as_ref()),
            Some(Cause::Message(_)) | None => None,
        }
    }
}

impl From<Kind> for Error {
    fn from(kind: Kind) -> Self {
        Self::new(kind)
    }
}

impl From<Builder> for Error {
    fn from(builder: Builder) -> Self {
        builder.build()
    }
}

/// Reports whether `err` is a structured [`Error`] that
/// [matches](Error::matches) `kind`. Other error types never match.
pub fn is(kind: Kind, err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<Error>()
        .is_some_and(|err| err.matches(kind))
}

/// Typed builder for [`Error`].
///
/// Each setter replaces the previous value of its field. [`Builder::cause`],
/// [`Builder::source`] and [`Builder::message`] all fill the single cause
/// slot, so the last one called wins.
#[derive(Debug, Default)]
#[must_use = "builders do nothing unless `build` is called"]
pub struct Builder {
    op: Option<Op>,
    kind: Kind,
    token: Option<Token>,
    cause: Option<Cause>,
}

impl Builder {
    pub fn op(mut self, op: impl Into<Op>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Wraps a structured error raised by an inner layer.
    pub fn cause(mut self, err: Error) -> Self {
        self.cause = Some(Cause::Error(Box::new(err)));
        self
    }

    /// Wraps a foreign error value.
    pub fn source(mut self, err: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Cause::Foreign(Arc::new(err)));
        self
    }

    /// Attaches a plain-text cause.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.cause = Some(Cause::Message(msg.into()));
        self
    }

    pub fn build(self) -> Error {
        Error {
            op: self.op,
            kind: self.kind,
            token: self.token,
            cause: self.cause,
            #[cfg(debug_assertions)]
            stack: Some(Arc::new(Backtrace::capture())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "3oMUY0bSsieok9GKuSQKpQ";

    fn network_unreachable() -> Error {
        Error::builder()
            .op(Op::new("Get"))
            .kind(Kind::Io)
            .message("network unreachable")
            .build()
    }

    #[test]
    fn renders_without_token() {
        let err = network_unreachable();
        assert_eq!(
            err.render(&Separator::default()),
            "Get: I/O error: network unreachable"
        );
    }

    #[test]
    fn renders_nested_with_custom_separator() {
        let err = Error::builder()
            .op(Op::new("Write"))
            .token(TOKEN)
            .kind(Kind::Other)
            .cause(network_unreachable())
            .build();

        let want = format!("Write: {TOKEN}: I/O error:: Get: network unreachable");
        assert_eq!(err.render(&Separator::new(":: ")), want);
    }

    #[test]
    fn render_omits_empty_fields() {
        assert_eq!(Error::default().render(&Separator::default()), "");
        assert_eq!(Error::new(Kind::Invalid).render(&Separator::default()), "invalid operation");

        let err = Error::builder()
            .op(Op::new(""))
            .token("")
            .message("")
            .build();
        assert_eq!(err.render(&Separator::default()), "");

        // An empty nested error leaves no dangling separator behind.
        let err = Error::builder()
            .op(Op::new("outer"))
            .cause(Error::default())
            .build();
        assert_eq!(err.render(&Separator::new(":: ")), "outer");

        let err = Error::builder().token(TOKEN).message("boom").build();
        assert_eq!(err.render(&Separator::default()), format!("{TOKEN}: boom"));
    }

    #[test]
    fn render_is_idempotent() {
        let err = Error::wrap(Op::new("outer"), network_unreachable());
        let sep = Separator::new(":: ");
        assert_eq!(err.render(&sep), err.render(&sep));
        assert_eq!(err.render(&sep), "outer: I/O error:: Get: network unreachable");
    }

    #[test]
    fn nested_kind_shown_when_it_differs() {
        let inner = Error::builder()
            .op(Op::new("inner"))
            .kind(Kind::Duplicate)
            .build();
        let outer = Error::builder()
            .op(Op::new("outer"))
            .kind(Kind::Internal)
            .cause(inner)
            .build();
        assert_eq!(
            outer.render(&Separator::new(" | ")),
            "outer: internal error | inner: item already exists"
        );
    }

    #[test]
    fn kind_propagates_through_unset_layers() {
        let err = Error::wrap(
            Op::new("a"),
            Error::wrap(Op::new("b"), network_unreachable()),
        );
        assert_eq!(err.own_kind(), Kind::Other);
        assert_eq!(err.kind(), Kind::Io);

        // An explicit outer kind wins over the inner one.
        let err = Error::builder()
            .kind(Kind::Internal)
            .cause(network_unreachable())
            .build();
        assert_eq!(err.kind(), Kind::Internal);

        // Foreign causes are never classified.
        let err = Error::builder()
            .source(std::io::Error::other("disk on fire"))
            .build();
        assert_eq!(err.kind(), Kind::Other);
    }

    #[test]
    fn matches_walks_the_chain() {
        let err = Error::builder()
            .op(Op::new("outer"))
            .kind(Kind::Internal)
            .cause(network_unreachable())
            .build();
        assert!(err.matches(Kind::Internal));
        assert!(err.matches(Kind::Io));
        assert!(!err.matches(Kind::Duplicate));

        let dynamic: &(dyn StdError + 'static) = &err;
        assert!(is(Kind::Io, dynamic));

        let foreign = std::io::Error::other("nope");
        assert!(!is(Kind::Other, &foreign));
    }

    #[test]
    fn source_exposes_the_cause() {
        let err = Error::wrap(Op::new("outer"), network_unreachable());
        let source = err.source().and_then(|s| s.downcast_ref::<Error>());
        assert_eq!(source.and_then(Error::op), Some(&Op::new("Get")));

        let err = Error::builder().message("text only").build();
        assert!(err.source().is_none());
    }

    #[test]
    fn last_cause_setter_wins() {
        let err = Error::builder()
            .cause(network_unreachable())
            .message("replaced")
            .build();
        assert!(matches!(err.cause(), Some(Cause::Message(m)) if m == "replaced"));
        assert_eq!(err.kind(), Kind::Other);
    }

    #[test]
    fn render_debug_starts_with_render() {
        let err = network_unreachable();
        let sep = Separator::default();
        assert!(err.render_debug(&sep).starts_with(&err.render(&sep)));
    }
}
