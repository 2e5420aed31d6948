//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::pin::Pin;

use futures::Stream;
use p4rt_engine::arbiter::ArbitrationUpdate;
use p4rt_engine::election::ElectionId;
use p4rt_engine::notification::{
    ArbitrationNotification, NotificationReceiver,
};
use p4rt_engine::pipeline::{
    Action, P4Info, PipelineConfig, ResponseType, SetPipelineRequest,
    TableInfo,
};
use p4rt_engine::table::{
    Atomicity, ReadFilter, TableEntry, Update, UpdateType, WriteRequest,
};
use p4rt_engine::{Code, DEFAULT_ROLE_ID, Engine, Error, Session};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, debug_span, error, trace};

use crate::config;

mod proto {
    #![allow(clippy::all)]
    tonic::include_proto!("p4rt.v1");
    pub use get_forwarding_pipeline_config_request::ResponseType;
    pub use p4_runtime_server::{P4Runtime, P4RuntimeServer};
    pub use set_forwarding_pipeline_config_request::Action;
    pub use update::Type as UpdateType;
    pub use write_request::Atomicity;
}

struct P4RuntimeService {
    engine: Engine,
}

type StreamResponse = Result<proto::StreamMessageResponse, Status>;

// ===== impl proto::P4Runtime =====

#[tonic::async_trait]
impl proto::P4Runtime for P4RuntimeService {
    type ReadStream =
        Pin<Box<dyn Stream<Item = Result<proto::ReadResponse, Status>> + Send>>;
    type StreamChannelStream = ReceiverStream<StreamResponse>;

    async fn write(
        &self,
        grpc_request: Request<proto::WriteRequest>,
    ) -> Result<Response<proto::WriteResponse>, Status> {
        let grpc_request = grpc_request.into_inner();
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received Write() request");
                trace!("{:?}", grpc_request);
            });
        });

        let request = WriteRequest::try_from(grpc_request)?;
        let response = self.engine.write(request).map_err(to_status)?;

        let results = response
            .results
            .iter()
            .map(|result| match result {
                Ok(()) => proto::Error {
                    canonical_code: tonic::Code::Ok as i32,
                    message: String::new(),
                },
                Err(error) => proto::Error::from(error),
            })
            .collect();
        Ok(Response::new(proto::WriteResponse { results }))
    }

    async fn read(
        &self,
        grpc_request: Request<proto::ReadRequest>,
    ) -> Result<Response<Self::ReadStream>, Status> {
        let grpc_request = grpc_request.into_inner();
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received Read() request");
                trace!("{:?}", grpc_request);
            });
        });

        let filter = ReadFilter::new(grpc_request.table_id);
        let entities = self
            .engine
            .read(grpc_request.device_id, filter)
            .map_err(to_status)?
            .into_iter()
            .map(proto::TableEntry::from)
            .collect();

        let response = proto::ReadResponse { entities };
        let stream =
            futures::stream::once(async move { Ok::<_, Status>(response) });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn set_forwarding_pipeline_config(
        &self,
        grpc_request: Request<proto::SetForwardingPipelineConfigRequest>,
    ) -> Result<Response<proto::SetForwardingPipelineConfigResponse>, Status>
    {
        let grpc_request = grpc_request.into_inner();
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received SetForwardingPipelineConfig() request");
                trace!("{:?}", grpc_request);
            });
        });

        let request = SetPipelineRequest::try_from(grpc_request)?;
        self.engine
            .set_pipeline_config(request)
            .map_err(to_status)?;

        Ok(Response::new(proto::SetForwardingPipelineConfigResponse {}))
    }

    async fn get_forwarding_pipeline_config(
        &self,
        grpc_request: Request<proto::GetForwardingPipelineConfigRequest>,
    ) -> Result<Response<proto::GetForwardingPipelineConfigResponse>, Status>
    {
        let grpc_request = grpc_request.into_inner();
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received GetForwardingPipelineConfig() request");
                trace!("{:?}", grpc_request);
            });
        });

        let response_type =
            proto::ResponseType::try_from(grpc_request.response_type)
                .map_err(|_| {
                    Status::invalid_argument("Invalid response type")
                })?;
        let config = self
            .engine
            .get_pipeline_config(
                grpc_request.device_id,
                response_type.into(),
            )
            .map_err(to_status)?
            .map(proto::ForwardingPipelineConfig::from);

        let grpc_response =
            proto::GetForwardingPipelineConfigResponse { config };
        Ok(Response::new(grpc_response))
    }

    async fn stream_channel(
        &self,
        grpc_request: Request<Streaming<proto::StreamMessageRequest>>,
    ) -> Result<Response<Self::StreamChannelStream>, Status> {
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received StreamChannel() request");
            });
        });

        let requests = grpc_request.into_inner();
        let (session, notification_rx) =
            self.engine.open_session().map_err(|error| {
                error.log();
                to_status(error)
            })?;
        let (response_tx, response_rx) = mpsc::channel(16);
        tokio::spawn(stream_task(
            self.engine.clone(),
            session,
            notification_rx,
            requests,
            response_tx,
        ));

        Ok(Response::new(ReceiverStream::new(response_rx)))
    }

    async fn capabilities(
        &self,
        grpc_request: Request<proto::CapabilitiesRequest>,
    ) -> Result<Response<proto::CapabilitiesResponse>, Status> {
        let grpc_request = grpc_request.into_inner();
        debug_span!("northbound").in_scope(|| {
            debug_span!("client", name = "grpc").in_scope(|| {
                debug!("received Capabilities() request");
                trace!("{:?}", grpc_request);
            });
        });

        let grpc_response = proto::CapabilitiesResponse {
            p4runtime_api_version: p4rt_engine::P4RUNTIME_VERSION.to_owned(),
        };
        Ok(Response::new(grpc_response))
    }
}

// ===== helper functions =====

// Serves a single stream channel until either side closes it or a fatal
// error occurs. The session is dropped on exit, which removes it from its
// arbitration group.
async fn stream_task(
    engine: Engine,
    mut session: Session,
    mut notification_rx: NotificationReceiver,
    mut requests: Streaming<proto::StreamMessageRequest>,
    response_tx: mpsc::Sender<StreamResponse>,
) {
    let span = debug_span!("session", id = %session.id());
    loop {
        tokio::select! {
            request = requests.message() => match request {
                Ok(Some(request)) => {
                    trace!(parent: &span, "{:?}", request);
                    match process_stream_msg(&engine, &mut session, request) {
                        Ok(Some(response)) => {
                            let _ = response_tx.send(Ok(response)).await;
                        }
                        Ok(None) => (),
                        Err(status) => {
                            let _ = response_tx.send(Err(status)).await;
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!(parent: &span, "stream closed by peer");
                    break;
                }
                Err(status) => {
                    debug!(parent: &span, %status, "stream failed");
                    break;
                }
            },
            Some(notification) = notification_rx.recv() => {
                let response = proto::StreamMessageResponse::from(notification);
                if response_tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
            _ = response_tx.closed() => {
                debug!(parent: &span, "stream receiver gone");
                break;
            }
        }
    }
}

// Processes a message received on a stream channel.
//
// Non-fatal errors are reported on the stream, fatal ones end it.
fn process_stream_msg(
    engine: &Engine,
    session: &mut Session,
    request: proto::StreamMessageRequest,
) -> Result<Option<proto::StreamMessageResponse>, Status> {
    use proto::stream_message_request::Update as RequestUpdate;
    use proto::stream_message_response::Update as ResponseUpdate;

    let Some(RequestUpdate::Arbitration(arbitration)) = request.update else {
        let error = proto::StreamError {
            canonical_code: tonic::Code::InvalidArgument as i32,
            message: "Missing stream message update".to_owned(),
        };
        return Ok(Some(proto::StreamMessageResponse {
            update: Some(ResponseUpdate::Error(error)),
        }));
    };

    match engine.arbitrate(session, ArbitrationUpdate::from(arbitration)) {
        Ok(_) => Ok(None),
        Err(error) => {
            error.log();
            if error.is_fatal() {
                return Err(to_status(error));
            }

            let error = proto::StreamError {
                canonical_code: grpc_code(error.code()) as i32,
                message: error.to_string(),
            };
            Ok(Some(proto::StreamMessageResponse {
                update: Some(ResponseUpdate::Error(error)),
            }))
        }
    }
}

fn grpc_code(code: Code) -> tonic::Code {
    match code {
        Code::Ok => tonic::Code::Ok,
        Code::InvalidArgument => tonic::Code::InvalidArgument,
        Code::NotFound => tonic::Code::NotFound,
        Code::AlreadyExists => tonic::Code::AlreadyExists,
        Code::PermissionDenied => tonic::Code::PermissionDenied,
        Code::ResourceExhausted => tonic::Code::ResourceExhausted,
        Code::FailedPrecondition => tonic::Code::FailedPrecondition,
        Code::Aborted => tonic::Code::Aborted,
        Code::Unimplemented => tonic::Code::Unimplemented,
    }
}

fn to_status(error: Error) -> Status {
    Status::new(grpc_code(error.code()), error.to_string())
}

fn election_id(election_id: Option<proto::Uint128>) -> Option<ElectionId> {
    election_id.map(|election_id| {
        ElectionId::new(election_id.high, election_id.low)
    })
}

// ===== conversions =====

impl From<&Error> for proto::Error {
    fn from(error: &Error) -> proto::Error {
        proto::Error {
            canonical_code: grpc_code(error.code()) as i32,
            message: error.to_string(),
        }
    }
}

impl From<proto::MasterArbitrationUpdate> for ArbitrationUpdate {
    fn from(arbitration: proto::MasterArbitrationUpdate) -> ArbitrationUpdate {
        let (role_id, role_config) = match arbitration.role {
            Some(role) => (role.id, role.config.map(Into::into)),
            None => (DEFAULT_ROLE_ID, None),
        };
        ArbitrationUpdate::new(
            arbitration.device_id,
            role_id,
            role_config,
            election_id(arbitration.election_id),
        )
    }
}

impl From<ArbitrationNotification> for proto::StreamMessageResponse {
    fn from(notification: ArbitrationNotification) -> Self {
        let status = proto::Error {
            canonical_code: grpc_code(notification.status) as i32,
            message: String::new(),
        };
        let arbitration = proto::MasterArbitrationUpdate {
            device_id: notification.device_id,
            role: Some(proto::Role {
                id: notification.role_id,
                config: notification.role_config.map(|config| config.to_vec()),
            }),
            election_id: notification.election_id.map(|election_id| {
                proto::Uint128 {
                    high: election_id.high(),
                    low: election_id.low(),
                }
            }),
            status: Some(status),
        };
        proto::StreamMessageResponse {
            update: Some(proto::stream_message_response::Update::Arbitration(
                arbitration,
            )),
        }
    }
}

impl TryFrom<proto::WriteRequest> for WriteRequest {
    type Error = Status;

    fn try_from(request: proto::WriteRequest) -> Result<Self, Status> {
        let atomicity = match proto::Atomicity::try_from(request.atomicity) {
            Ok(proto::Atomicity::ContinueOnError) => Atomicity::ContinueOnError,
            Ok(proto::Atomicity::RollbackOnError) => Atomicity::RollbackOnError,
            Ok(proto::Atomicity::DataplaneAtomic) => Atomicity::DataplaneAtomic,
            Err(_) => {
                return Err(Status::invalid_argument("Invalid atomicity"));
            }
        };
        let updates = request
            .updates
            .into_iter()
            .map(Update::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let request = WriteRequest::new(
            request.device_id,
            request.role_id,
            election_id(request.election_id),
            updates,
        );
        Ok(request.with_atomicity(atomicity))
    }
}

impl TryFrom<proto::Update> for Update {
    type Error = Status;

    fn try_from(update: proto::Update) -> Result<Self, Status> {
        let update_type = match proto::UpdateType::try_from(update.r#type) {
            Ok(proto::UpdateType::Unspecified) => UpdateType::Unspecified,
            Ok(proto::UpdateType::Insert) => UpdateType::Insert,
            Ok(proto::UpdateType::Modify) => UpdateType::Modify,
            Ok(proto::UpdateType::Delete) => UpdateType::Delete,
            Err(_) => {
                return Err(Status::invalid_argument("Invalid update type"));
            }
        };
        let entity = update.entity.ok_or_else(|| {
            Status::invalid_argument("Missing 'entity' field")
        })?;

        Ok(Update::new(update_type, entity.into()))
    }
}

impl From<proto::TableEntry> for TableEntry {
    fn from(entry: proto::TableEntry) -> TableEntry {
        TableEntry::new(
            entry.table_id,
            entry.r#match.into(),
            entry.priority,
            entry.action.into(),
        )
    }
}

impl From<TableEntry> for proto::TableEntry {
    fn from(entry: TableEntry) -> proto::TableEntry {
        proto::TableEntry {
            table_id: entry.table_id,
            r#match: entry.match_key.to_vec(),
            priority: entry.priority,
            action: entry.action.to_vec(),
        }
    }
}

impl TryFrom<proto::SetForwardingPipelineConfigRequest>
    for SetPipelineRequest
{
    type Error = Status;

    fn try_from(
        request: proto::SetForwardingPipelineConfigRequest,
    ) -> Result<Self, Status> {
        let action = match proto::Action::try_from(request.action) {
            Ok(proto::Action::Unspecified) => Action::Unspecified,
            Ok(proto::Action::Verify) => Action::Verify,
            Ok(proto::Action::VerifyAndSave) => Action::VerifyAndSave,
            Ok(proto::Action::VerifyAndCommit) => Action::VerifyAndCommit,
            Ok(proto::Action::Commit) => Action::Commit,
            Err(_) => return Err(Status::invalid_argument("Invalid action")),
        };

        Ok(SetPipelineRequest::new(
            request.device_id,
            request.role_id,
            election_id(request.election_id),
            action,
            request.config.map(Into::into),
        ))
    }
}

impl From<proto::ForwardingPipelineConfig> for PipelineConfig {
    fn from(config: proto::ForwardingPipelineConfig) -> PipelineConfig {
        let p4info = config.p4info.map(|p4info| {
            let tables = p4info
                .tables
                .into_iter()
                .map(|table| TableInfo::new(table.id, table.name, table.size))
                .collect();
            P4Info::new(tables)
        });
        let cookie = config.cookie.map(|cookie| cookie.cookie).unwrap_or(0);

        PipelineConfig::new(p4info, config.p4_device_config.into(), cookie)
    }
}

impl From<PipelineConfig> for proto::ForwardingPipelineConfig {
    fn from(config: PipelineConfig) -> proto::ForwardingPipelineConfig {
        let p4info = config.p4info.map(|p4info| proto::P4Info {
            tables: p4info
                .tables
                .into_iter()
                .map(|table| proto::Table {
                    id: table.id,
                    name: table.name,
                    size: table.size,
                })
                .collect(),
        });

        proto::ForwardingPipelineConfig {
            p4info,
            p4_device_config: config.device_config.to_vec(),
            cookie: Some(proto::forwarding_pipeline_config::Cookie {
                cookie: config.cookie,
            }),
        }
    }
}

impl From<proto::ResponseType> for ResponseType {
    fn from(response_type: proto::ResponseType) -> ResponseType {
        match response_type {
            proto::ResponseType::All => ResponseType::All,
            proto::ResponseType::CookieOnly => ResponseType::CookieOnly,
            proto::ResponseType::P4infoAndCookie => {
                ResponseType::P4InfoAndCookie
            }
            proto::ResponseType::DeviceConfigAndCookie => {
                ResponseType::DeviceConfigAndCookie
            }
        }
    }
}

// ===== global functions =====

pub(crate) fn start(config: &config::Grpc, engine: Engine) {
    let address = config
        .address
        .parse()
        .expect("Failed to parse gRPC server address");
    let service = P4RuntimeService { engine };

    let server = Server::builder();
    let mut server = match config.tls.enabled {
        true => {
            let cert = match std::fs::read(&config.tls.certificate) {
                Ok(value) => value,
                Err(error) => {
                    error!(%error, "failed to read TLS certificate");
                    return;
                }
            };
            let key = match std::fs::read(&config.tls.key) {
                Ok(value) => value,
                Err(error) => {
                    error!(%error, "failed to read TLS key");
                    return;
                }
            };

            let identity = tonic::transport::Identity::from_pem(cert, key);
            server
                .tls_config(ServerTlsConfig::new().identity(identity))
                .expect("Failed to setup gRPC TLS")
        }
        false => server,
    };

    tokio::spawn(async move {
        server
            .add_service(proto::P4RuntimeServer::new(service))
            .serve(address)
            .await
            .expect("Failed to start gRPC service");
    });
}

// ===== unit tests =====
