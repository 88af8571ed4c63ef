use url::Url;

use crate::error::ArcadeError;

/// Builds the URL a player opens to join a session.
#[derive(Clone, Debug)]
pub struct JoinLinks {
    base: Url,
}

impl JoinLinks {
    pub fn new(scheme: &str, host: &str) -> Result<Self, ArcadeError> {
        let base = Url::parse(&format!("{}://{}/", scheme, host))
            .map_err(|e| ArcadeError::Config(format!("invalid public address {}://{}: {}", scheme, host, e)))?;
        Ok(Self { base })
    }

    /// `scheme://host/?game={id}`, with the id encoded
    pub fn url_for(&self, id: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut().clear().append_pair("game", id);
        url.into()
    }
}
