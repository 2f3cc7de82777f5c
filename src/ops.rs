//! Typed protocol operations.
//!
//! One public entry point per operation, each following the same shape:
//! validate caller options locally, build the operation body, issue the
//! call through the session and map `<ok/>` or the payload back. Local
//! validation failures never reach the wire.
//!
//! Strategy and datastore names round-trip byte-for-byte through
//! `as_str` / `FromStr`, so a value read off the wire re-encodes
//! identically.
//!
//! # Example
//!
//! ```no_run
//! # use netconf_client::{Session, SessionConfig};
//! # use netconf_client::ops::{Datastore, GetConfigOptions, Source};
//! # async fn example(session: Session) -> netconf_client::Result<()> {
//! let config = session
//!     .get_config(
//!         Source::Datastore(Datastore::Running),
//!         GetConfigOptions {
//!             filter: Some(r#"/library/book[title="Go Programming"]"#.to_string()),
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::codec::encode::BodyBuilder;
use crate::codec::filter::subtree_filter;
use crate::codec::NOTIFICATION_NS;
use crate::error::{NetconfError, Result};
use crate::session::Session;

/// A named configuration datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    /// The active configuration. Always present.
    Running,
    /// Scratch datastore, requires the `:candidate` capability.
    Candidate,
    /// Configuration loaded at boot, requires the `:startup` capability.
    Startup,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datastore {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Datastore::Running),
            "candidate" => Ok(Datastore::Candidate),
            "startup" => Ok(Datastore::Startup),
            other => Err(NetconfError::Validation(format!(
                "unknown datastore {:?}",
                other
            ))),
        }
    }
}

/// How edit-config merges incoming configuration into the target.
///
/// Only `Merge`, `Replace` and `None` may be used as the operation-wide
/// default; the rest appear as per-element `operation` attributes inside
/// the config payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Merge,
    Replace,
    None,
    Create,
    Delete,
    Remove,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Replace => "replace",
            MergeStrategy::None => "none",
            MergeStrategy::Create => "create",
            MergeStrategy::Delete => "delete",
            MergeStrategy::Remove => "remove",
        }
    }

    /// Whether the strategy is legal as the operation-wide default.
    pub fn valid_as_default(&self) -> bool {
        matches!(
            self,
            MergeStrategy::Merge | MergeStrategy::Replace | MergeStrategy::None
        )
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(MergeStrategy::Merge),
            "replace" => Ok(MergeStrategy::Replace),
            "none" => Ok(MergeStrategy::None),
            "create" => Ok(MergeStrategy::Create),
            "delete" => Ok(MergeStrategy::Delete),
            "remove" => Ok(MergeStrategy::Remove),
            other => Err(NetconfError::Validation(format!(
                "unknown merge strategy {:?}",
                other
            ))),
        }
    }
}

/// How edit-config tests configuration before applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStrategy {
    /// Validate first, apply only if valid.
    TestThenSet,
    /// Apply without testing.
    Set,
    /// Validate only, never modify the datastore.
    TestOnly,
}

impl TestStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStrategy::TestThenSet => "test-then-set",
            TestStrategy::Set => "set",
            TestStrategy::TestOnly => "test-only",
        }
    }
}

impl fmt::Display for TestStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStrategy {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test-then-set" => Ok(TestStrategy::TestThenSet),
            "set" => Ok(TestStrategy::Set),
            "test-only" => Ok(TestStrategy::TestOnly),
            other => Err(NetconfError::Validation(format!(
                "unknown test strategy {:?}",
                other
            ))),
        }
    }
}

/// How edit-config reacts to errors partway through applying the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Abort on the first error.
    StopOnError,
    /// Keep going and report accumulated errors in the reply.
    ContinueOnError,
    /// Restore the previous configuration, requires `:rollback-on-error`.
    RollbackOnError,
}

impl ErrorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStrategy::StopOnError => "stop-on-error",
            ErrorStrategy::ContinueOnError => "continue-on-error",
            ErrorStrategy::RollbackOnError => "rollback-on-error",
        }
    }
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorStrategy {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop-on-error" => Ok(ErrorStrategy::StopOnError),
            "continue-on-error" => Ok(ErrorStrategy::ContinueOnError),
            "rollback-on-error" => Ok(ErrorStrategy::RollbackOnError),
            other => Err(NetconfError::Validation(format!(
                "unknown error strategy {:?}",
                other
            ))),
        }
    }
}

/// Where configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A named datastore, encoded as an element named after the identifier.
    Datastore(Datastore),
    /// An inline `<config>` payload (raw XML fragment).
    Config(String),
    /// A URL the peer fetches, requires the `:url` capability.
    Url(String),
}

impl Source {
    fn write(&self, b: &mut BodyBuilder) -> Result<()> {
        match self {
            Source::Datastore(ds) => b.tag_name_selector("source", ds.as_str()),
            Source::Config(xml) => {
                b.start("source")?;
                b.start("config")?;
                b.raw(xml)?;
                b.end("config")?;
                b.end("source")
            }
            Source::Url(url) => {
                b.start("source")?;
                b.text_element("url", url)?;
                b.end("source")
            }
        }
    }
}

/// Where configuration is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Datastore(Datastore),
    /// Requires the `:url` capability.
    Url(String),
}

impl Target {
    fn write(&self, b: &mut BodyBuilder) -> Result<()> {
        match self {
            Target::Datastore(ds) => b.tag_name_selector("target", ds.as_str()),
            Target::Url(url) => {
                b.start("target")?;
                b.text_element("url", url)?;
                b.end("target")
            }
        }
    }
}

/// The configuration payload of an edit-config request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditConfigContent {
    /// Inline `<config>` subtree (raw XML fragment).
    Config(String),
    /// A URL the peer fetches, requires the `:url` capability.
    Url(String),
}

/// Options for [`Session::get_config`].
#[derive(Debug, Clone, Default)]
pub struct GetConfigOptions {
    /// Path expression translated to a subtree filter. A path that does
    /// not translate fails the call before anything is sent.
    pub filter: Option<String>,
}

/// Options for [`Session::edit_config`].
#[derive(Debug, Clone, Default)]
pub struct EditConfigOptions {
    pub default_merge_strategy: Option<MergeStrategy>,
    pub test_strategy: Option<TestStrategy>,
    pub error_strategy: Option<ErrorStrategy>,
}

impl EditConfigOptions {
    fn validate(&self) -> Result<()> {
        if let Some(strategy) = self.default_merge_strategy {
            if !strategy.valid_as_default() {
                return Err(NetconfError::Validation(format!(
                    "{} cannot be the default merge strategy",
                    strategy
                )));
            }
        }
        Ok(())
    }
}

/// Options for [`Session::commit`].
///
/// `persist_id` confirms an earlier confirmed commit; `confirmed`,
/// `confirm_timeout` and `persist` start a new one. The two directions are
/// mutually exclusive within a single request. Setting `confirm_timeout`
/// or `persist` implies `confirmed`.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub confirmed: bool,
    pub confirm_timeout: Option<Duration>,
    pub persist: Option<String>,
    pub persist_id: Option<String>,
}

impl CommitOptions {
    fn validate(&self) -> Result<()> {
        if self.persist_id.is_some()
            && (self.confirmed || self.confirm_timeout.is_some() || self.persist.is_some())
        {
            return Err(NetconfError::Validation(
                "persist-id cannot be combined with a new confirmed commit directive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn is_confirmed(&self) -> bool {
        self.confirmed || self.confirm_timeout.is_some() || self.persist.is_some()
    }
}

/// Options for [`Session::cancel_commit`].
#[derive(Debug, Clone, Default)]
pub struct CancelCommitOptions {
    /// Cancels the confirmed commit holding this token; without it the
    /// peer cancels the session's own outstanding confirmed commit.
    pub persist_id: Option<String>,
}

/// Options for [`Session::create_subscription`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Event stream to subscribe to; the peer's default stream if unset.
    pub stream: Option<String>,
    /// Path expression translated to a subtree filter. A path that does
    /// not translate fails the call before anything is sent.
    pub filter: Option<String>,
    /// Replay start; requires the `:notification` replay feature.
    pub start_time: Option<DateTime<Utc>>,
    /// Replay cutoff; only valid together with `start_time`.
    pub end_time: Option<DateTime<Utc>>,
}

impl SubscriptionOptions {
    fn validate(&self) -> Result<()> {
        if self.end_time.is_some() && self.start_time.is_none() {
            return Err(NetconfError::Validation(
                "subscription end-time requires a start-time".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_config_body(source: &Source, options: &GetConfigOptions) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start("get-config")?;
    source.write(&mut b)?;
    if let Some(path) = &options.filter {
        b.raw(&subtree_filter(path)?)?;
    }
    b.end("get-config")?;
    Ok(b.finish())
}

fn edit_config_body(
    target: &Target,
    content: &EditConfigContent,
    options: &EditConfigOptions,
) -> Result<String> {
    options.validate()?;
    let mut b = BodyBuilder::new();
    b.start("edit-config")?;
    target.write(&mut b)?;
    if let Some(strategy) = options.default_merge_strategy {
        b.text_element("default-operation", strategy.as_str())?;
    }
    if let Some(strategy) = options.test_strategy {
        b.text_element("test-option", strategy.as_str())?;
    }
    if let Some(strategy) = options.error_strategy {
        b.text_element("error-option", strategy.as_str())?;
    }
    match content {
        EditConfigContent::Config(xml) => {
            b.start("config")?;
            b.raw(xml)?;
            b.end("config")?;
        }
        EditConfigContent::Url(url) => b.text_element("url", url)?,
    }
    b.end("edit-config")?;
    Ok(b.finish())
}

fn copy_config_body(source: &Source, target: &Target) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start("copy-config")?;
    source.write(&mut b)?;
    target.write(&mut b)?;
    b.end("copy-config")?;
    Ok(b.finish())
}

fn delete_config_body(target: &Target) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start("delete-config")?;
    target.write(&mut b)?;
    b.end("delete-config")?;
    Ok(b.finish())
}

fn lock_body(operation: &str, target: &Target) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start(operation)?;
    target.write(&mut b)?;
    b.end(operation)?;
    Ok(b.finish())
}

fn kill_session_body(session_id: u64) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start("kill-session")?;
    b.text_element("session-id", &session_id.to_string())?;
    b.end("kill-session")?;
    Ok(b.finish())
}

fn validate_body(source: &Source) -> Result<String> {
    let mut b = BodyBuilder::new();
    b.start("validate")?;
    source.write(&mut b)?;
    b.end("validate")?;
    Ok(b.finish())
}

fn commit_body(options: &CommitOptions) -> Result<String> {
    options.validate()?;
    let mut b = BodyBuilder::new();
    if !options.is_confirmed() && options.persist_id.is_none() {
        b.empty("commit")?;
        return Ok(b.finish());
    }
    b.start("commit")?;
    b.presence("confirmed", options.is_confirmed())?;
    if let Some(timeout) = options.confirm_timeout {
        b.text_element("confirm-timeout", &timeout.as_secs().to_string())?;
    }
    if let Some(token) = &options.persist {
        b.text_element("persist", token)?;
    }
    if let Some(token) = &options.persist_id {
        b.text_element("persist-id", token)?;
    }
    b.end("commit")?;
    Ok(b.finish())
}

fn cancel_commit_body(options: &CancelCommitOptions) -> Result<String> {
    let mut b = BodyBuilder::new();
    match &options.persist_id {
        Some(token) => {
            b.start("cancel-commit")?;
            b.text_element("persist-id", token)?;
            b.end("cancel-commit")?;
        }
        None => b.empty("cancel-commit")?,
    }
    Ok(b.finish())
}

fn create_subscription_body(options: &SubscriptionOptions) -> Result<String> {
    options.validate()?;
    let mut b = BodyBuilder::new();
    b.start_with_attrs("create-subscription", &[("xmlns", NOTIFICATION_NS)])?;
    if let Some(stream) = &options.stream {
        b.text_element("stream", stream)?;
    }
    if let Some(path) = &options.filter {
        b.raw(&subtree_filter(path)?)?;
    }
    if let Some(start) = &options.start_time {
        b.text_element("startTime", &start.to_rfc3339())?;
    }
    if let Some(end) = &options.end_time {
        b.text_element("endTime", &end.to_rfc3339())?;
    }
    b.end("create-subscription")?;
    Ok(b.finish())
}

impl Session {
    /// Retrieve configuration from a source datastore, optionally
    /// narrowed by a subtree filter. Returns the inner XML of the
    /// reply's `<data>` element.
    pub async fn get_config(
        &self,
        source: Source,
        options: GetConfigOptions,
    ) -> Result<String> {
        let body = get_config_body(&source, &options)?;
        let reply = self.call(&body).await?;
        Ok(reply.data.unwrap_or_default())
    }

    /// Change part of a target datastore's configuration.
    pub async fn edit_config(
        &self,
        target: Target,
        content: EditConfigContent,
        options: EditConfigOptions,
    ) -> Result<()> {
        let body = edit_config_body(&target, &content, &options)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Replace the target's entire configuration with the source's.
    pub async fn copy_config(&self, source: Source, target: Target) -> Result<()> {
        let body = copy_config_body(&source, &target)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Delete a configuration datastore. The running datastore cannot be
    /// deleted; the peer rejects that with an rpc-error.
    pub async fn delete_config(&self, target: Target) -> Result<()> {
        let body = delete_config_body(&target)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Take the short-lived configuration lock on a datastore.
    pub async fn lock(&self, target: Target) -> Result<()> {
        let body = lock_body("lock", &target)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Release a lock previously taken with [`Session::lock`].
    pub async fn unlock(&self, target: Target) -> Result<()> {
        let body = lock_body("unlock", &target)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Forcibly terminate another session. Killing this session's own id
    /// is rejected locally.
    pub async fn kill_session(&self, session_id: u64) -> Result<()> {
        if session_id == self.session_id() {
            return Err(NetconfError::Validation(
                "cannot kill the current session".to_string(),
            ));
        }
        let body = kill_session_body(session_id)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Validate the contents of a configuration source, requires the
    /// `:validate` capability.
    pub async fn validate(&self, source: Source) -> Result<()> {
        let body = validate_body(&source)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Commit the candidate datastore to running, requires the
    /// `:candidate` capability. See [`CommitOptions`] for confirmed
    /// commits.
    pub async fn commit(&self, options: CommitOptions) -> Result<()> {
        let body = commit_body(&options)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Cancel an outstanding confirmed commit.
    pub async fn cancel_commit(&self, options: CancelCommitOptions) -> Result<()> {
        let body = cancel_commit_body(&options)?;
        self.call(&body).await?;
        Ok(())
    }

    /// Subscribe to asynchronous event notifications. Delivery goes to
    /// the channel registered with [`Session::notifications`].
    pub async fn create_subscription(&self, options: SubscriptionOptions) -> Result<()> {
        let body = create_subscription_body(&options)?;
        self.call(&body).await?;
        Ok(())
    }
}
