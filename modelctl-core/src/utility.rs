//! # Utility Service
//!
//! Server-wide calls that aren't tied to a model: the version of the server, checked against
//! the constraint of the session before anything else is done, and the status of its database.
use crate::bridge::{self, FieldParameters, RpcEventBridge, field_text as text};
use crate::config::SessionContext;
use crate::error::{Error, ObjectRef};
use crate::grpc::channel::CallChannel;
use crate::grpc::client::CallOptions;
use crate::schema::{SchemaCatalog, SchemaSource};
use prost_reflect::{DynamicMessage, ReflectMessage};
use semver::{Version, VersionReq};
use std::sync::Arc;

/// Name under which the server is reported in version errors.
pub const SERVER_NAME: &str = "xos-core";

/// Build information reported by `GetVersion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub version: String,
    pub python_version: String,
    pub django_version: Option<String>,
    pub git_commit: String,
    pub build_time: String,
    pub os: String,
    pub arch: String,
}

/// Status of the server database, as reported by `GetDatabaseInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: String,
    pub connection: String,
    pub status: String,
}

pub struct UtilityClient<Ch, Src> {
    channel: Ch,
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
}

impl<Ch: CallChannel, Src: SchemaSource> UtilityClient<Ch, Src> {
    pub fn new(
        channel: Ch,
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            channel,
            catalog,
            session,
        }
    }

    async fn call(&mut self, method: &str) -> Result<DynamicMessage, Error> {
        let method = self
            .catalog
            .method(&self.catalog.layout().utility_service, method)
            .await?;
        let options = CallOptions::new(self.session.headers(), self.session.timeout());
        let mut bridge = RpcEventBridge::new(FieldParameters::new());

        bridge::unary(&mut self.channel, method, &mut bridge, options)
            .await
            .map_err(|e| e.with_object(ObjectRef::default()))
    }

    pub async fn server_version(&mut self) -> Result<ServerVersion, Error> {
        let response = self.call("GetVersion").await?;

        Ok(ServerVersion {
            version: text(&response, "version"),
            python_version: text(&response, "pythonVersion"),
            django_version: response
                .descriptor()
                .get_field_by_name("djangoVersion")
                .map(|_| text(&response, "djangoVersion")),
            git_commit: text(&response, "gitCommit"),
            build_time: text(&response, "buildTime"),
            os: text(&response, "os"),
            arch: text(&response, "arch"),
        })
    }

    /// Fetches the server version and checks it against the constraint of the session.
    ///
    /// # Returns
    ///
    /// * `Ok(Version)` - The server version, without its pre-release suffix.
    /// * `Err(Error::VersionConstraint)` - If the server is outside the supported range.
    pub async fn check_version(&mut self) -> Result<Version, Error> {
        let reported = self.server_version().await?.version;
        let version = check_version_constraint(&reported, &self.session.version_constraint)?;
        tracing::debug!(
            %version,
            constraint = %self.session.version_constraint,
            "server version accepted"
        );
        Ok(version)
    }

    pub async fn database_info(&mut self) -> Result<DatabaseInfo, Error> {
        let response = self.call("GetDatabaseInfo").await?;

        Ok(DatabaseInfo {
            name: text(&response, "name"),
            version: text(&response, "version"),
            connection: text(&response, "connection"),
            status: text(&response, "status"),
        })
    }
}

/// Parses a version reported by the server, e.g. `3.2.6-dev`.
///
/// Everything from the first `-` is dropped, and missing minor or patch numbers read as zero.
pub fn parse_server_version(reported: &str) -> Result<Version, Error> {
    let core = reported.split('-').next().unwrap_or_default().trim();

    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&parts.join(".")).map_err(|e| {
        Error::internal(format!("The server reported an invalid version '{reported}': {e}"))
    })
}

/// Fails with [`Error::VersionConstraint`] unless `reported` satisfies `constraint`.
pub fn check_version_constraint(reported: &str, constraint: &str) -> Result<Version, Error> {
    let version = parse_server_version(reported)?;
    let requirement = VersionReq::parse(constraint).map_err(|e| {
        Error::InvalidInput(format!("Invalid version constraint '{constraint}': {e}"))
    })?;

    if requirement.matches(&version) {
        Ok(version)
    } else {
        Err(Error::VersionConstraint {
            name: SERVER_NAME.to_string(),
            version: version.to_string(),
            constraint: constraint.to_string(),
        })
    }
}
