use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

static DEFAULT: Separator = Separator(Cow::Borrowed(": "));
static INSTALLED: OnceLock<Separator> = OnceLock::new();

/// Text placed between an error and the structured error it wraps when
/// rendering.
///
/// The default is `": "`, which makes a nested chain indistinguishable from
/// the fields of a single error. Services that want cause boundaries to stand
/// out install a different separator (e.g. `":: "`) once at startup:
///
/// ```
/// use ledger::Separator;
///
/// let _ = Separator::new(":: ").install();
/// assert_eq!(Separator::global().as_str(), ":: ");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Separator(Cow<'static, str>);

impl Separator {
    pub fn new(sep: impl Into<Cow<'static, str>>) -> Self {
        Self(sep.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Installs `self` as the process-wide separator used by `Display`.
    ///
    /// # Errors
    ///
    /// Returns the rejected separator if one was already installed.
    pub fn install(self) -> Result<(), Separator> {
        INSTALLED.set(self)
    }

    /// The installed separator, or the default if none was installed.
    pub fn global() -> &'static Separator {
        INSTALLED.get().unwrap_or(&DEFAULT)
    }
}

impl Default for Separator {
    fn default() -> Self {
        DEFAULT.clone()
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
