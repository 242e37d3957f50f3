//! Turns [`StoreOptions`] into a [`ConnectionDescriptor`].
//!
//! Resolution walks an ordered list of sources: host-framework connection,
//! existing handle, URL, discrete fields. Each source reports what it knows;
//! earlier sources win field by field, a `Complete` outcome ends the walk, and
//! defaults fill whatever is still unset. Nothing here touches the network.

use crate::error::{invalid_option, missing_option, SessionResult};
use crate::model::{ConnectionDescriptor, ConnectionParams, Credentials};
use crate::options::{StoreOptions, DEFAULT_COLLECTION, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TTL};
use std::time::Duration;
use url::{Host, Url};

/// Fields a source could supply. `None` means "no opinion".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialDescriptor {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ttl: Option<Duration>,
    pub tls: Option<bool>,
    pub auto_reconnect: Option<bool>,
    pub borrowed: bool,
}

impl PartialDescriptor {
    fn from_params(params: ConnectionParams) -> Self {
        let (username, password) = match params.credentials {
            Some(creds) => (Some(creds.username), Some(creds.password)),
            None => (None, None),
        };
        Self {
            host: Some(params.host),
            port: Some(params.port),
            database: Some(params.database),
            username,
            password,
            tls: Some(params.tls),
            auto_reconnect: Some(params.auto_reconnect),
            ..Self::default()
        }
    }

    /// Fills every unset field from `lower`.
    fn merge_missing(&mut self, lower: PartialDescriptor) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.host, lower.host);
        fill(&mut self.port, lower.port);
        fill(&mut self.database, lower.database);
        fill(&mut self.collection, lower.collection);
        fill(&mut self.username, lower.username);
        fill(&mut self.password, lower.password);
        fill(&mut self.ttl, lower.ttl);
        fill(&mut self.tls, lower.tls);
        fill(&mut self.auto_reconnect, lower.auto_reconnect);
        self.borrowed |= lower.borrowed;
    }

    fn finish(self) -> SessionResult<ConnectionDescriptor> {
        let database = self
            .database
            .filter(|db| !db.is_empty())
            .ok_or_else(|| missing_option("db"))?;
        let credentials = match (self.username, self.password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Some(Credentials { username, password })
            }
            _ => None,
        };
        Ok(ConnectionDescriptor {
            host: self
                .host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            database,
            collection: self
                .collection
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            credentials,
            ttl: self.ttl.unwrap_or(DEFAULT_TTL),
            tls: self.tls.unwrap_or(false),
            auto_reconnect: self.auto_reconnect.unwrap_or(false),
            borrowed: self.borrowed,
        })
    }
}

/// Outcome of asking one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Connection fields are fixed; lower-priority sources are not consulted.
    Complete(PartialDescriptor),
    /// Some fields known; lower-priority sources fill the rest.
    Partial(PartialDescriptor),
    NotApplicable,
}

/// One place connection settings may come from.
pub trait ConfigSource {
    fn name(&self) -> &'static str;
    fn resolve(&self, options: &StoreOptions) -> SessionResult<Resolution>;
}

/// Store-level settings that apply regardless of how the connection is found.
fn store_settings(options: &StoreOptions) -> PartialDescriptor {
    PartialDescriptor {
        collection: options.collection.clone(),
        username: options.username.clone(),
        password: options.password.clone(),
        ttl: options.ttl(),
        ..PartialDescriptor::default()
    }
}

/// Parameters of a host-framework connection. A fresh connection is opened.
pub struct FrameworkSource;

impl ConfigSource for FrameworkSource {
    fn name(&self) -> &'static str {
        "framework"
    }

    fn resolve(&self, options: &StoreOptions) -> SessionResult<Resolution> {
        let Some(framework) = options.framework.as_ref() else {
            return Ok(Resolution::NotApplicable);
        };
        let mut partial = PartialDescriptor::from_params(framework.params());
        partial.merge_missing(store_settings(options));
        Ok(Resolution::Complete(partial))
    }
}

/// An already-open handle. It is reused as-is.
pub struct HandleSource;

impl ConfigSource for HandleSource {
    fn name(&self) -> &'static str {
        "handle"
    }

    fn resolve(&self, options: &StoreOptions) -> SessionResult<Resolution> {
        let Some(existing) = options.connection.as_ref() else {
            return Ok(Resolution::NotApplicable);
        };
        let mut partial = PartialDescriptor::from_params(existing.params.clone());
        partial.borrowed = true;
        partial.merge_missing(store_settings(options));
        Ok(Resolution::Complete(partial))
    }
}

/// `scheme://[user:pass@]host[:port]/db[/collection]`
///
/// The query string and fragment are ignored.
pub struct UrlSource;

impl UrlSource {
    pub fn parse(raw: &str) -> SessionResult<PartialDescriptor> {
        let url = Url::parse(raw).map_err(|err| invalid_option("url", err))?;
        let mut partial = PartialDescriptor {
            host: url.host().and_then(host_name),
            port: url.port(),
            ..PartialDescriptor::default()
        };

        if let Some(mut segments) = url.path_segments() {
            partial.database = segments.next().filter(|s| !s.is_empty()).map(decode).transpose()?;
            partial.collection = segments.next().filter(|s| !s.is_empty()).map(decode).transpose()?;
        }

        if !url.username().is_empty() {
            partial.username = Some(decode(url.username())?);
            partial.password = url.password().map(decode).transpose()?;
        }

        Ok(partial)
    }
}

/// IPv6 literals lose their URL brackets.
fn host_name(host: Host<&str>) -> Option<String> {
    match host {
        Host::Domain(name) if name.is_empty() => None,
        Host::Domain(name) => Some(name.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

fn decode(raw: &str) -> SessionResult<String> {
    urlencoding::decode(raw)
        .map(|value| value.into_owned())
        .map_err(|err| invalid_option("url", err))
}

impl ConfigSource for UrlSource {
    fn name(&self) -> &'static str {
        "url"
    }

    fn resolve(&self, options: &StoreOptions) -> SessionResult<Resolution> {
        match options.url.as_deref() {
            Some(raw) if !raw.is_empty() => Ok(Resolution::Partial(Self::parse(raw)?)),
            _ => Ok(Resolution::NotApplicable),
        }
    }
}

/// Individual `host`, `port`, `db`, ... fields.
pub struct DiscreteSource;

impl ConfigSource for DiscreteSource {
    fn name(&self) -> &'static str {
        "discrete"
    }

    fn resolve(&self, options: &StoreOptions) -> SessionResult<Resolution> {
        let mut partial = PartialDescriptor {
            host: options.host.clone(),
            port: options.port,
            database: options.db.clone(),
            tls: options.ssl,
            auto_reconnect: options.auto_reconnect,
            ..PartialDescriptor::default()
        };
        partial.merge_missing(store_settings(options));
        Ok(Resolution::Partial(partial))
    }
}

/// Ordered source list used by [`resolve`].
pub fn default_sources() -> Vec<Box<dyn ConfigSource>> {
    vec![
        Box::new(FrameworkSource),
        Box::new(HandleSource),
        Box::new(UrlSource),
        Box::new(DiscreteSource),
    ]
}

/// Resolves options through the given sources, highest priority first.
pub fn resolve_with(
    options: &StoreOptions,
    sources: &[Box<dyn ConfigSource>],
) -> SessionResult<ConnectionDescriptor> {
    let mut merged = PartialDescriptor::default();
    for source in sources {
        match source.resolve(options)? {
            Resolution::Complete(partial) => {
                tracing::debug!(source = source.name(), "connection settings fully resolved");
                merged.merge_missing(partial);
                break;
            }
            Resolution::Partial(partial) => {
                tracing::debug!(source = source.name(), "connection settings partially resolved");
                merged.merge_missing(partial);
            }
            Resolution::NotApplicable => {}
        }
    }
    merged.finish()
}

/// Resolves options with the standard precedence:
/// framework connection > existing handle > URL > discrete fields > defaults.
pub fn resolve(options: &StoreOptions) -> SessionResult<ConnectionDescriptor> {
    resolve_with(options, &default_sources())
}
