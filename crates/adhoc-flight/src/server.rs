//! Demo Arrow Flight server
//!
//! A small in-process Flight service that serves registered tables. It
//! speaks the same header authentication, cookie and session-option
//! protocol the client uses, which makes it the counterpart for demos and
//! end-to-end tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use arrow::array::{Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaAsIpc, SchemaResult, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use prost::Message;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::{KeyAndValueRef, MetadataMap, MetadataValue};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};
use uuid::Uuid;

use adhoc_core::properties::SCHEMA;

use crate::auth::{bearer_authorization, extract_bearer, parse_basic, AUTHORIZATION};
use crate::cookies::{COOKIE, SET_COOKIE};
use crate::error::FlightError;
use crate::session::{
    CloseSessionResult, CloseSessionStatus, SessionOptionError, SessionOptionErrorValue,
    SessionOptionValue, SetSessionOptionsRequest, SetSessionOptionsResult, CLOSE_SESSION,
    SET_SESSION_OPTIONS,
};

/// Schema path of the demo table
pub const DEMO_SCHEMA: &str = "$scratch";
/// Unqualified name of the demo table
pub const DEMO_TABLE: &str = "flight_demo_table";
/// Name of the cookie pinning a client to its session
pub const SESSION_COOKIE: &str = "adhoc_session";

/// The demo table: three integer columns holding `(1, 2, 3)` and `(4, 5, 6)`
pub fn demo_batch() -> Result<RecordBatch, ArrowError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("EXPR$0", DataType::Int32, false),
        Field::new("EXPR$1", DataType::Int32, false),
        Field::new("EXPR$2", DataType::Int32, false),
    ]));
    let columns: Vec<arrow::array::ArrayRef> = vec![
        Arc::new(Int32Array::from(vec![1, 4])),
        Arc::new(Int32Array::from(vec![2, 5])),
        Arc::new(Int32Array::from(vec![3, 6])),
    ];
    RecordBatch::try_new(schema, columns)
}

struct StoredTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// Table storage for the Flight server, keyed by schema-qualified name
#[derive(Default)]
struct TableStore {
    tables: HashMap<String, StoredTable>,
}

impl TableStore {
    fn register(&mut self, name: &str, schema: SchemaRef, batches: Vec<RecordBatch>) {
        self.tables
            .insert(name.to_string(), StoredTable { schema, batches });
    }

    /// Look `name` up as given, then qualified by the default schema path
    fn resolve(&self, name: &str, schema_path: Option<&str>) -> Option<(String, &StoredTable)> {
        if let Some(table) = self.tables.get(name) {
            return Some((name.to_string(), table));
        }
        let qualified = format!("{}.{}", schema_path?, name);
        self.tables.get(&qualified).map(|table| (qualified, table))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Arrow Flight server hosting a [`DemoFlightService`]
pub struct FlightServer {
    service: DemoFlightService,
}

impl FlightServer {
    /// Create a new Flight server
    pub fn new() -> Self {
        Self {
            service: DemoFlightService::new(),
        }
    }

    pub fn with_service(service: DemoFlightService) -> Self {
        Self { service }
    }

    /// Get a reference to the service for registering tables and users
    pub fn service(&self) -> &DemoFlightService {
        &self.service
    }

    /// Start serving on the given address
    pub async fn serve(self, addr: SocketAddr) -> Result<(), FlightError> {
        info!("Starting Flight server on {}", addr);

        Server::builder()
            .add_service(FlightServiceServer::new(self.service))
            .serve(addr)
            .await?;

        Ok(())
    }

    /// Serve connections accepted on an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<(), FlightError> {
        info!("Starting Flight server on {}", listener.local_addr()?);

        Server::builder()
            .add_service(FlightServiceServer::new(self.service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;

        Ok(())
    }
}

impl Default for FlightServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Flight service state. Clones share tables, credentials and sessions.
#[derive(Clone, Default)]
pub struct DemoFlightService {
    tables: Arc<RwLock<TableStore>>,
    users: Arc<RwLock<HashMap<String, String>>>,
    tokens: Arc<RwLock<HashSet<String>>>,
    session_options: Arc<RwLock<HashMap<String, SessionOptionValue>>>,
    last_headers: Arc<RwLock<HashMap<String, String>>>,
}

impl DemoFlightService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under a (possibly schema-qualified) name
    pub fn register_table(&self, name: &str, schema: SchemaRef, batches: Vec<RecordBatch>) {
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        self.tables.write().register(name, schema, batches);
        info!(table = name, rows, "Registered table");
    }

    /// Register a table from a single RecordBatch
    pub fn register_batch(&self, name: &str, batch: RecordBatch) {
        self.register_table(name, batch.schema(), vec![batch]);
    }

    /// Register `$scratch.flight_demo_table`
    pub fn register_demo_table(&self) -> Result<(), FlightError> {
        self.register_batch(&format!("{}.{}", DEMO_SCHEMA, DEMO_TABLE), demo_batch()?);
        Ok(())
    }

    /// Get list of registered tables
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.read().names()
    }

    /// Accept a username/password pair on the handshake.
    ///
    /// Once any user or token is registered every call must authenticate.
    pub fn add_user(&self, username: &str, password: &str) {
        self.users
            .write()
            .insert(username.to_string(), password.to_string());
    }

    /// Accept a static bearer token, such as a personal access token
    pub fn add_token(&self, token: &str) {
        self.tokens.write().insert(token.to_string());
    }

    /// Headers received with the most recent call
    pub fn last_headers(&self) -> HashMap<String, String> {
        self.last_headers.read().clone()
    }

    /// Current session options rendered as strings
    pub fn session_options(&self) -> HashMap<String, String> {
        self.session_options
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }

    fn auth_required(&self) -> bool {
        !self.users.read().is_empty() || !self.tokens.read().is_empty()
    }

    fn record_headers(&self, metadata: &MetadataMap) {
        let mut headers = HashMap::new();
        for entry in metadata.iter() {
            if let KeyAndValueRef::Ascii(key, value) = entry {
                if let Ok(value) = value.to_str() {
                    headers.insert(key.as_str().to_string(), value.to_string());
                }
            }
        }
        *self.last_headers.write() = headers;
    }

    /// Record the call and check its bearer token
    fn check_call(&self, metadata: &MetadataMap) -> Result<(), Status> {
        self.record_headers(metadata);
        if !self.auth_required() {
            return Ok(());
        }
        match extract_bearer(metadata) {
            Some(token) if self.tokens.read().contains(&token) => Ok(()),
            Some(_) => Err(Status::unauthenticated("invalid bearer token")),
            None => Err(Status::unauthenticated("missing bearer token")),
        }
    }

    /// Hand out a session cookie to callers that do not carry one yet
    fn with_session_cookie<T>(&self, request: &MetadataMap, mut response: Response<T>) -> Response<T> {
        let has_session = request
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(&format!("{}=", SESSION_COOKIE)));
        if !has_session {
            let cookie = format!("{}={}; Path=/", SESSION_COOKIE, Uuid::new_v4());
            if let Ok(value) = MetadataValue::try_from(cookie.as_str()) {
                response.metadata_mut().insert(SET_COOKIE, value);
            }
        }
        response
    }

    /// Resolve the table a query refers to, honouring the `schema` header
    fn resolve_table(
        &self,
        query: &str,
        metadata: &MetadataMap,
    ) -> Result<(String, SchemaRef, Vec<RecordBatch>), Status> {
        let table_name = Self::extract_table_name(query);
        let schema_path = metadata.get(SCHEMA).and_then(|v| v.to_str().ok());

        let tables = self.tables.read();
        let (name, table) = tables
            .resolve(&table_name, schema_path)
            .ok_or_else(|| Status::from(FlightError::TableNotFound(table_name.clone())))?;
        Ok((name, table.schema.clone(), table.batches.clone()))
    }

    /// Extract table name from a query string
    fn extract_table_name(query: &str) -> String {
        let query = query.trim();
        // ASCII uppercasing keeps byte offsets valid for slicing `query`
        let upper = query.to_ascii_uppercase();

        // Handle "SELECT ... FROM table_name" format
        if upper.starts_with("SELECT") {
            if let Some(from_pos) = upper.find(" FROM ") {
                let after_from = query[from_pos + 6..].trim();
                return after_from
                    .split(|c: char| c.is_whitespace() || c == ';')
                    .next()
                    .unwrap_or(query)
                    .trim_matches('"')
                    .to_string();
            }
        }

        // Otherwise, treat the whole query as a table name
        query.trim_end_matches(';').to_string()
    }

    fn descriptor_query(descriptor: &FlightDescriptor) -> Result<String, Status> {
        if !descriptor.cmd.is_empty() {
            Ok(String::from_utf8_lossy(&descriptor.cmd).to_string())
        } else if !descriptor.path.is_empty() {
            Ok(descriptor.path.join("."))
        } else {
            Err(Status::invalid_argument("No query or table provided"))
        }
    }

    fn set_session_options(&self, request: SetSessionOptionsRequest) -> SetSessionOptionsResult {
        let mut result = SetSessionOptionsResult::default();
        let mut options = self.session_options.write();

        for (name, value) in request.session_options {
            let rejection = if name.trim().is_empty() {
                Some(SessionOptionErrorValue::InvalidName)
            } else if value.option_value.is_none() {
                Some(SessionOptionErrorValue::InvalidValue)
            } else {
                None
            };

            match rejection {
                Some(reason) => {
                    warn!(option = %name, ?reason, "Rejected session option");
                    result.errors.insert(
                        name,
                        SessionOptionError {
                            value: reason as i32,
                        },
                    );
                }
                None => {
                    debug!(option = %name, value = %value, "Session option set");
                    options.insert(name, value);
                }
            }
        }
        result
    }
}

fn action_result(body: Vec<u8>) -> BoxStream<'static, Result<arrow_flight::Result, Status>> {
    let result = arrow_flight::Result { body: body.into() };
    stream::once(async { Ok(result) }).boxed()
}

#[tonic::async_trait]
impl FlightService for DemoFlightService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    /// Basic credentials in, bearer token out
    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        let metadata = request.metadata().clone();
        self.record_headers(&metadata);

        let authorization = metadata
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let token = match parse_basic(authorization) {
            Some((username, password)) => {
                let valid = self.users.read().get(&username) == Some(&password);
                if !valid {
                    warn!(user = %username, "Rejected handshake");
                    return Err(Status::unauthenticated("invalid username or password"));
                }
                let token = Uuid::new_v4().to_string();
                self.tokens.write().insert(token.clone());
                info!(user = %username, "Issued bearer token");
                token
            }
            None => match extract_bearer(&metadata) {
                Some(token) if self.tokens.read().contains(&token) => token,
                _ => return Err(Status::unauthenticated("missing credentials")),
            },
        };

        let response = HandshakeResponse {
            protocol_version: 0,
            payload: Default::default(),
        };
        let mut response = Response::new(stream::once(async { Ok::<_, Status>(response) }).boxed());
        let header = MetadataValue::try_from(bearer_authorization(&token).as_str())
            .map_err(|e| Status::internal(e.to_string()))?;
        response.metadata_mut().insert(AUTHORIZATION, header);
        Ok(self.with_session_cookie(&metadata, response))
    }

    /// List available tables as flights
    async fn list_flights(
        &self,
        request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        self.check_call(request.metadata())?;

        let tables = self.tables.read();
        let mut flights = Vec::new();
        for name in tables.names() {
            let Some((_, table)) = tables.resolve(&name, None) else {
                continue;
            };
            let path: Vec<String> = name.split('.').map(str::to_string).collect();
            let info = FlightInfo::new()
                .with_descriptor(FlightDescriptor::new_path(path))
                .try_with_schema(&table.schema)
                .map_err(|e| Status::internal(e.to_string()))?;
            flights.push(Ok(info));
        }

        Ok(Response::new(stream::iter(flights).boxed()))
    }

    /// Get flight info for a specific query
    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        self.check_call(request.metadata())?;
        let metadata = request.metadata().clone();
        let descriptor = request.into_inner();
        let query = Self::descriptor_query(&descriptor)?;

        let (name, schema, batches) = self.resolve_table(&query, &metadata)?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        debug!(query = %query, table = %name, rows, "Resolved flight");

        // Ticket carries the resolved name so DoGet needs no schema header
        let info = FlightInfo::new()
            .with_descriptor(descriptor)
            .try_with_schema(&schema)
            .map_err(|e| Status::internal(e.to_string()))?
            .with_endpoint(FlightEndpoint::new().with_ticket(Ticket::new(name)));

        Ok(self.with_session_cookie(&metadata, Response::new(info)))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("PollFlightInfo is not supported"))
    }

    /// Get schema for a flight
    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        self.check_call(request.metadata())?;
        let metadata = request.metadata().clone();
        let query = Self::descriptor_query(request.get_ref())?;
        let (_, schema, _) = self.resolve_table(&query, &metadata)?;

        let options = IpcWriteOptions::default();
        let result: SchemaResult = SchemaAsIpc::new(&schema, &options)
            .try_into()
            .map_err(|e: ArrowError| Status::internal(e.to_string()))?;

        Ok(self.with_session_cookie(&metadata, Response::new(result)))
    }

    /// Stream a table's batches
    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.check_call(request.metadata())?;
        let metadata = request.metadata().clone();
        let query = String::from_utf8_lossy(&request.get_ref().ticket).to_string();

        let (name, schema, batches) = self.resolve_table(&query, &metadata)?;
        info!(table = %name, batches = batches.len(), "Streaming table");

        // The schema is sent up front so empty tables still describe themselves
        let flight_data_stream = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(stream::iter(batches.into_iter().map(Ok)))
            .map_err(|e| Status::internal(e.to_string()));

        Ok(self.with_session_cookie(&metadata, Response::new(flight_data_stream.boxed())))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("DoPut is not supported"))
    }

    /// Session option actions
    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        self.check_call(request.metadata())?;
        let metadata = request.metadata().clone();
        let action = request.into_inner();

        let body = match action.r#type.as_str() {
            SET_SESSION_OPTIONS => {
                let request = SetSessionOptionsRequest::decode(action.body)
                    .map_err(|e| Status::invalid_argument(e.to_string()))?;
                self.set_session_options(request).encode_to_vec()
            }
            CLOSE_SESSION => {
                self.session_options.write().clear();
                info!("Session closed");
                CloseSessionResult {
                    status: CloseSessionStatus::Closed as i32,
                }
                .encode_to_vec()
            }
            other => {
                return Err(Status::unimplemented(format!("Unknown action: {}", other)));
            }
        };

        Ok(self.with_session_cookie(&metadata, Response::new(action_result(body))))
    }

    /// List available actions
    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let actions = vec![
            Ok(ActionType {
                r#type: SET_SESSION_OPTIONS.to_string(),
                description: "Set options for the current session".to_string(),
            }),
            Ok(ActionType {
                r#type: CLOSE_SESSION.to_string(),
                description: "Close the current session".to_string(),
            }),
        ];

        Ok(Response::new(stream::iter(actions).boxed()))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("DoExchange is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_table() {
        let service = DemoFlightService::new();
        assert!(service.list_tables().is_empty());

        service.register_demo_table().unwrap();
        assert_eq!(service.list_tables(), vec!["$scratch.flight_demo_table"]);
    }

    #[test]
    fn test_extract_table_name() {
        assert_eq!(
            DemoFlightService::extract_table_name("SELECT * FROM users"),
            "users"
        );
        assert_eq!(
            DemoFlightService::extract_table_name("select id, name from employees where id > 5"),
            "employees"
        );
        assert_eq!(
            DemoFlightService::extract_table_name("SELECT * FROM \"flight_demo_table\";"),
            "flight_demo_table"
        );
        assert_eq!(DemoFlightService::extract_table_name("my_table"), "my_table");
    }

    #[test]
    fn test_extract_table_name_after_non_ascii() {
        assert_eq!(
            DemoFlightService::extract_table_name("SELECT 'ŉŉŉŉ' FROM flight_demo_table"),
            "flight_demo_table"
        );
        assert_eq!(
            DemoFlightService::extract_table_name("select 'ß' from données"),
            "données"
        );
    }

    #[test]
    fn test_resolve_falls_back_to_schema_path() {
        let service = DemoFlightService::new();
        service.register_demo_table().unwrap();

        let mut metadata = MetadataMap::new();
        let missing = service.resolve_table("SELECT * FROM flight_demo_table", &metadata);
        assert_eq!(missing.unwrap_err().code(), tonic::Code::NotFound);

        metadata.insert(SCHEMA, DEMO_SCHEMA.parse().unwrap());
        let (name, _, batches) = service
            .resolve_table("SELECT * FROM flight_demo_table", &metadata)
            .unwrap();
        assert_eq!(name, "$scratch.flight_demo_table");
        assert_eq!(batches[0].num_rows(), 2);
    }

    #[test]
    fn test_auth_only_required_once_configured() {
        let service = DemoFlightService::new();
        let metadata = MetadataMap::new();
        assert!(service.check_call(&metadata).is_ok());

        service.add_token("pat");
        assert_eq!(
            service.check_call(&metadata).unwrap_err().code(),
            tonic::Code::Unauthenticated
        );

        let mut metadata = MetadataMap::new();
        metadata.insert(AUTHORIZATION, "Bearer pat".parse().unwrap());
        assert!(service.check_call(&metadata).is_ok());
        assert_eq!(
            service.last_headers().get(AUTHORIZATION).map(String::as_str),
            Some("Bearer pat")
        );
    }

    #[test]
    fn test_session_options_validation() {
        let service = DemoFlightService::new();
        let mut request = SetSessionOptionsRequest::from_pairs([("project_id", "p1")]);
        request
            .session_options
            .insert("broken".to_string(), SessionOptionValue::default());

        let result = service.set_session_options(request);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors.contains_key("broken"));
        assert_eq!(
            service.session_options().get("project_id").map(String::as_str),
            Some("p1")
        );
    }

    #[test]
    fn test_demo_batch() {
        let batch = demo_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);
    }
}
