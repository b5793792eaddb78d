//! Arrow Flight client for connecting to Flight servers
//!
//! Handles connection setup, header authentication, call properties,
//! cookies and session options, and hands query results to the
//! [`BatchUnifier`] as a [`FlightBatchStream`].

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use adhoc_core::{BatchUnifier, CallProperties, ConnectionConfig, Credentials, Table, WriteSummary};
use arrow::datatypes::{Schema, SchemaRef};
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, Criteria, FlightDescriptor, FlightInfo, HandshakeRequest};
use futures::{stream, TryStreamExt};
use prost::bytes::Bytes;
use prost::Message;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;
use tracing::{debug, info, warn};

use crate::auth::{basic_authorization, bearer_authorization, extract_bearer, AUTHORIZATION};
use crate::cookies::{CookieJar, COOKIE};
use crate::error::FlightError;
use crate::session::{
    CloseSessionRequest, CloseSessionResult, CloseSessionStatus, SetSessionOptionsRequest,
    SetSessionOptionsResult, CLOSE_SESSION, PROJECT_ID, SET_SESSION_OPTIONS,
};
use crate::stream::FlightBatchStream;

/// Delay between connection attempts while waiting for a server
const READY_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Flight client for remote query execution
pub struct FlightClient {
    client: FlightServiceClient<Channel>,
    endpoint: String,
    bearer: Option<String>,
    properties: CallProperties,
    cookies: CookieJar,
}

impl FlightClient {
    /// Connect to a Flight server
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, FlightError> {
        config.validate()?;
        let url = config.url();
        info!("Connecting to Flight server at {}", url);

        let mut endpoint = Endpoint::from_shared(url.clone())
            .map_err(|e| FlightError::InvalidRequest(e.to_string()))?
            .connect_timeout(config.connect_timeout());

        if config.tls.enabled {
            let root_certs = config.tls.root_certs.as_ref().ok_or_else(|| {
                FlightError::InvalidRequest("TLS enabled without trusted certificates".into())
            })?;
            let pem = tokio::fs::read(root_certs).await?;
            let tls = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(pem))
                .domain_name(config.host.clone());
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = endpoint.connect().await?;
        Ok(Self::from_channel(channel, url))
    }

    /// Keep trying to connect until the server answers or `timeout` elapses
    pub async fn connect_when_ready(
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<Self, FlightError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match Self::connect(config).await {
                Ok(client) => {
                    info!(attempts, "Flight server is ready");
                    return Ok(client);
                }
                Err(FlightError::TransportError(e)) => {
                    if tokio::time::Instant::now() + READY_RETRY_INTERVAL >= deadline {
                        return Err(FlightError::Timeout(format!(
                            "server at {} not ready after {} attempts: {}",
                            config.url(),
                            attempts,
                            e
                        )));
                    }
                    debug!(attempts, error = %e, "Server not ready, retrying");
                    tokio::time::sleep(READY_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wrap an already established channel
    pub fn from_channel(channel: Channel, endpoint: impl Into<String>) -> Self {
        Self {
            client: FlightServiceClient::new(channel),
            endpoint: endpoint.into(),
            bearer: None,
            properties: CallProperties::new(),
            cookies: CookieJar::new(),
        }
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer.is_some()
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Properties sent with every call
    pub fn properties(&self) -> &CallProperties {
        &self.properties
    }

    pub fn set_properties(&mut self, properties: CallProperties) {
        self.properties = properties;
    }

    pub fn with_properties(mut self, properties: CallProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Establish the credential used by every later call.
    ///
    /// `properties` travel only with the handshake; use
    /// [`FlightClient::set_properties`] for headers every call should carry.
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        properties: &CallProperties,
    ) -> Result<(), FlightError> {
        match credentials {
            Credentials::Basic { username, password } => {
                self.handshake(username, password, properties).await
            }
            Credentials::Token { token } => {
                info!("Using bearer token authentication");
                self.bearer = Some(token.clone());
                Ok(())
            }
            Credentials::None => {
                self.bearer = None;
                Ok(())
            }
        }
    }

    /// Basic-auth handshake; the server answers with a bearer token header
    async fn handshake(
        &mut self,
        username: &str,
        password: &str,
        properties: &CallProperties,
    ) -> Result<(), FlightError> {
        let hello = HandshakeRequest {
            protocol_version: 0,
            payload: Default::default(),
        };
        let mut request = Request::new(stream::iter(vec![hello]));
        {
            let metadata = request.metadata_mut();
            for property in self.properties.merged(properties).iter() {
                insert_header(metadata, &property.key, &property.value)?;
            }
            if let Some(cookie) = self.cookies.header_value() {
                insert_header(metadata, COOKIE, &cookie)?;
            }
            insert_header(metadata, AUTHORIZATION, &basic_authorization(username, password))?;
        }

        let response = self.client.handshake(request).await?;
        self.cookies.ingest(response.metadata());
        let bearer = extract_bearer(response.metadata());

        let mut stream = response.into_inner();
        while stream.message().await?.is_some() {}

        let token = bearer.ok_or_else(|| {
            FlightError::Unauthenticated("handshake returned no bearer token".into())
        })?;
        self.bearer = Some(token);
        info!(user = %username, "Handshake completed");
        Ok(())
    }

    /// Fetch the result schema of a query without running it
    pub async fn get_schema(
        &mut self,
        query: &str,
        extra: &CallProperties,
    ) -> Result<SchemaRef, FlightError> {
        let request = self.request(FlightDescriptor::new_cmd(query.to_string()), extra)?;
        let response = self.client.get_schema(request).await?;
        self.cookies.ingest(response.metadata());

        let schema = Schema::try_from(&response.into_inner())?;
        Ok(Arc::new(schema))
    }

    pub async fn get_flight_info(
        &mut self,
        query: &str,
        extra: &CallProperties,
    ) -> Result<FlightInfo, FlightError> {
        debug!(query, "GetFlightInfo");
        let request = self.request(FlightDescriptor::new_cmd(query.to_string()), extra)?;
        let response = self.client.get_flight_info(request).await?;
        self.cookies.ingest(response.metadata());
        Ok(response.into_inner())
    }

    /// Run a query and stream its results from the first endpoint
    pub async fn execute(
        &mut self,
        query: &str,
        extra: &CallProperties,
    ) -> Result<FlightBatchStream, FlightError> {
        info!("Executing query: {}", query);
        let info = self.get_flight_info(query, extra).await?;

        if info.endpoint.len() > 1 {
            warn!(
                endpoints = info.endpoint.len(),
                "Flight info has several endpoints, reading only the first"
            );
        }
        let ticket = info
            .endpoint
            .first()
            .and_then(|endpoint| endpoint.ticket.clone())
            .ok_or_else(|| FlightError::MissingEndpoint(query.to_string()))?;
        let declared = info.try_decode_schema().ok().map(Arc::new);

        let request = self.request(ticket, extra)?;
        let response = self.client.do_get(request).await?;
        self.cookies.ingest(response.metadata());

        let data = response
            .into_inner()
            .map_err(arrow_flight::error::FlightError::Tonic);
        FlightBatchStream::open(
            FlightRecordBatchStream::new_from_flight_data(data),
            declared,
            query,
        )
        .await
    }

    /// Run a query and unify its results into one table
    pub async fn run_query(
        &mut self,
        query: &str,
        extra: &CallProperties,
        unifier: &BatchUnifier,
    ) -> Result<Table, FlightError> {
        let mut stream = self.execute(query, extra).await?;
        Ok(unifier.unify_to_table(&mut stream).await?)
    }

    /// Run a query and serialize its results to `sink` as an IPC stream
    pub async fn save_query<W: Write>(
        &mut self,
        query: &str,
        extra: &CallProperties,
        unifier: &BatchUnifier,
        sink: Option<W>,
    ) -> Result<(WriteSummary, Option<W>), FlightError> {
        let mut stream = self.execute(query, extra).await?;
        Ok(unifier.write_to_stream(&mut stream, sink).await?)
    }

    /// Names of the flights the server advertises
    pub async fn list_flights(&mut self) -> Result<Vec<String>, FlightError> {
        let request = self.request(Criteria::default(), &CallProperties::new())?;
        let response = self.client.list_flights(request).await?;
        self.cookies.ingest(response.metadata());

        let mut stream = response.into_inner();
        let mut flights = Vec::new();
        while let Some(info) = stream.message().await? {
            if let Some(descriptor) = info.flight_descriptor {
                if !descriptor.path.is_empty() {
                    flights.push(descriptor.path.join("."));
                }
            }
        }

        Ok(flights)
    }

    /// Set session options; any option the server rejects fails the call
    pub async fn set_session_options(
        &mut self,
        request: SetSessionOptionsRequest,
    ) -> Result<(), FlightError> {
        let names: Vec<String> = request.session_options.keys().cloned().collect();
        let bodies = self
            .do_action(SET_SESSION_OPTIONS, request.encode_to_vec())
            .await?;

        let result = match bodies.into_iter().next() {
            Some(body) => SetSessionOptionsResult::decode(body)?,
            None => SetSessionOptionsResult::default(),
        };
        if !result.errors.is_empty() {
            return Err(FlightError::SessionOption(result.describe_errors()));
        }

        info!(options = ?names, "Session options set");
        Ok(())
    }

    /// Select the project subsequent queries run against
    pub async fn set_project_id(&mut self, project_id: &str) -> Result<(), FlightError> {
        self.set_session_options(SetSessionOptionsRequest::from_pairs([(
            PROJECT_ID, project_id,
        )]))
        .await
    }

    /// Close the server-side session
    pub async fn close_session(&mut self) -> Result<CloseSessionStatus, FlightError> {
        let bodies = self
            .do_action(CLOSE_SESSION, CloseSessionRequest {}.encode_to_vec())
            .await?;

        let result = match bodies.into_iter().next() {
            Some(body) => CloseSessionResult::decode(body)?,
            None => CloseSessionResult::default(),
        };
        let status = CloseSessionStatus::try_from(result.status)
            .unwrap_or(CloseSessionStatus::Unspecified);

        info!(?status, "Session closed");
        Ok(status)
    }

    async fn do_action(
        &mut self,
        action_type: &str,
        body: Vec<u8>,
    ) -> Result<Vec<Bytes>, FlightError> {
        debug!(action = action_type, "DoAction");
        let request = self.request(Action::new(action_type, body), &CallProperties::new())?;
        let response = self.client.do_action(request).await?;
        self.cookies.ingest(response.metadata());

        let mut stream = response.into_inner();
        let mut bodies = Vec::new();
        while let Some(result) = stream.message().await? {
            bodies.push(result.body);
        }
        Ok(bodies)
    }

    /// Wrap `message` with the default and extra properties, cookies and
    /// the bearer credential
    fn request<T>(&self, message: T, extra: &CallProperties) -> Result<Request<T>, FlightError> {
        let mut request = Request::new(message);
        self.apply_headers(request.metadata_mut(), extra)?;
        Ok(request)
    }

    fn apply_headers(
        &self,
        metadata: &mut MetadataMap,
        extra: &CallProperties,
    ) -> Result<(), FlightError> {
        for property in self.properties.merged(extra).iter() {
            insert_header(metadata, &property.key, &property.value)?;
        }
        if let Some(cookie) = self.cookies.header_value() {
            insert_header(metadata, COOKIE, &cookie)?;
        }
        if let Some(token) = &self.bearer {
            insert_header(metadata, AUTHORIZATION, &bearer_authorization(token))?;
        }
        Ok(())
    }
}

fn insert_header(metadata: &mut MetadataMap, key: &str, value: &str) -> Result<(), FlightError> {
    let name = AsciiMetadataKey::from_bytes(key.as_bytes())
        .map_err(|e| FlightError::InvalidHeader(format!("{}: {}", key, e)))?;
    let value = AsciiMetadataValue::try_from(value)
        .map_err(|e| FlightError::InvalidHeader(format!("{}: {}", key, e)))?;
    metadata.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_client() -> FlightClient {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        FlightClient::from_channel(channel, "http://127.0.0.1:1")
    }

    #[tokio::test]
    async fn test_invalid_connection() {
        let config = ConnectionConfig::local(1);
        let result = FlightClient::connect(&config).await;
        // Should fail to connect to non-existent server
        assert!(matches!(result, Err(FlightError::TransportError(_))));
    }

    #[tokio::test]
    async fn test_tls_requires_certificates() {
        let mut config = ConnectionConfig::local(32010);
        config.tls.enabled = true;
        let result = FlightClient::connect(&config).await;
        assert!(matches!(result, Err(FlightError::Core(_))));
    }

    #[tokio::test]
    async fn test_connect_when_ready_times_out() {
        let config = ConnectionConfig::local(1);
        let result = FlightClient::connect_when_ready(&config, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(FlightError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_headers_carry_properties_and_token() {
        let mut client = lazy_client().with_properties(CallProperties::schema("$scratch").unwrap());
        client
            .authenticate(&Credentials::token("pat-1"), &CallProperties::new())
            .await
            .unwrap();
        assert!(client.is_authenticated());

        let extra = CallProperties::new().with("engine", "preview").unwrap();
        let request = client.request((), &extra).unwrap();
        let metadata = request.metadata();
        assert_eq!(metadata.get("schema").unwrap().to_str().unwrap(), "$scratch");
        assert_eq!(metadata.get("engine").unwrap().to_str().unwrap(), "preview");
        assert_eq!(metadata.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer pat-1");
        assert!(metadata.get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_credentials_none_clears_token() {
        let mut client = lazy_client();
        client
            .authenticate(&Credentials::token("t"), &CallProperties::new())
            .await
            .unwrap();
        client
            .authenticate(&Credentials::None, &CallProperties::new())
            .await
            .unwrap();
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_insert_header_rejects_bad_values() {
        let mut metadata = MetadataMap::new();
        assert!(insert_header(&mut metadata, "ok", "value").is_ok());
        assert!(matches!(
            insert_header(&mut metadata, "bad key", "value"),
            Err(FlightError::InvalidHeader(_))
        ));
        assert!(matches!(
            insert_header(&mut metadata, "ok", "line\nbreak"),
            Err(FlightError::InvalidHeader(_))
        ));
    }
}
