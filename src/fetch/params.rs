//! Fetch Parameters Module
//!
//! Request parameters shared by single and multi fetchers.

use std::collections::BTreeSet;
use std::fmt;

// == Session Token ==
/// Opaque auth token forwarded to the remote call. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

// == Fetch Context ==
/// Per-request context handed to the remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchContext {
    /// Bypass the TTL window (pull-to-refresh)
    pub refresh: bool,
    /// Auth/session info for the remote call
    pub session: Option<SessionToken>,
}

impl FetchContext {
    /// Context for an explicit user-triggered refresh.
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionToken) -> Self {
        self.session = Some(session);
        self
    }
}

// == Multi Fetch Params ==
/// Set of subjects fetched in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiFetchParams<S: Ord> {
    pub subjects: BTreeSet<S>,
    pub context: FetchContext,
}

impl<S: Ord> MultiFetchParams<S> {
    pub fn new(subjects: impl IntoIterator<Item = S>) -> Self {
        Self {
            subjects: subjects.into_iter().collect(),
            context: FetchContext::default(),
        }
    }

    pub fn with_context(mut self, context: FetchContext) -> Self {
        self.context = context;
        self
    }
}

// == Single Fetch Params ==
/// One subject, folded into a singleton [`MultiFetchParams`] before fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleFetchParams<S> {
    pub subject: S,
    pub context: FetchContext,
}

impl<S> SingleFetchParams<S> {
    pub fn new(subject: S) -> Self {
        Self {
            subject,
            context: FetchContext::default(),
        }
    }

    pub fn with_context(mut self, context: FetchContext) -> Self {
        self.context = context;
        self
    }
}

impl<S: Ord> From<SingleFetchParams<S>> for MultiFetchParams<S> {
    fn from(params: SingleFetchParams<S>) -> Self {
        Self {
            subjects: BTreeSet::from([params.subject]),
            context: params.context,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_is_redacted() {
        let context = FetchContext::default().with_session(SessionToken::new("secret-token"));
        let printed = format!("{:?}", context);

        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("***"));
        assert_eq!(context.session.unwrap().expose(), "secret-token");
    }

    #[test]
    fn test_multi_params_deduplicate_subjects() {
        let params = MultiFetchParams::new(["ETH", "BTC", "ETH"]);
        assert_eq!(params.subjects.len(), 2);
        assert!(!params.context.refresh);
    }

    #[test]
    fn test_single_folds_into_singleton_multi() {
        let single = SingleFetchParams::new("ETH").with_context(FetchContext::refresh());
        let multi: MultiFetchParams<&str> = single.into();

        assert_eq!(multi.subjects, BTreeSet::from(["ETH"]));
        assert!(multi.context.refresh);
    }
}
