// gRPC engine client
// Decision: Declare the few engine messages we need with prost derives instead of vendoring protos
// Decision: Workflow input is a single JSON payload tagged "json/plain"
//
// Wire surface used:
// - temporal.api.workflowservice.v1.WorkflowService/StartWorkflowExecution
// - grpc.health.v1.Health/Check (service = WorkflowService)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::session::StartRequest;
use http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bootstrap::{AttemptError, Connector, EngineAddress};
use crate::engine::{EngineError, StartedWorkflow, WorkflowStarter};

const START_WORKFLOW_PATH: &str =
    "/temporal.api.workflowservice.v1.WorkflowService/StartWorkflowExecution";
const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";
const WORKFLOW_SERVICE: &str = "temporal.api.workflowservice.v1.WorkflowService";

const PAYLOAD_ENCODING_KEY: &str = "encoding";
const PAYLOAD_ENCODING_JSON: &[u8] = b"json/plain";

/// TASK_QUEUE_KIND_NORMAL
const TASK_QUEUE_KIND_NORMAL: i32 = 1;

/// grpc.health.v1 SERVING
const HEALTH_SERVING: i32 = 1;

// =============================================================================
// Wire messages
// =============================================================================

/// Engine protobuf messages (subset)
pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WorkflowType {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TaskQueue {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub kind: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Payload {
        #[prost(map = "string, bytes", tag = "1")]
        pub metadata: HashMap<String, Vec<u8>>,
        #[prost(bytes = "vec", tag = "2")]
        pub data: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Payloads {
        #[prost(message, repeated, tag = "1")]
        pub payloads: Vec<Payload>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StartWorkflowExecutionRequest {
        #[prost(string, tag = "1")]
        pub namespace: String,
        #[prost(string, tag = "2")]
        pub workflow_id: String,
        #[prost(message, optional, tag = "3")]
        pub workflow_type: Option<WorkflowType>,
        #[prost(message, optional, tag = "4")]
        pub task_queue: Option<TaskQueue>,
        #[prost(message, optional, tag = "5")]
        pub input: Option<Payloads>,
        #[prost(string, tag = "9")]
        pub identity: String,
        #[prost(string, tag = "10")]
        pub request_id: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StartWorkflowExecutionResponse {
        #[prost(string, tag = "1")]
        pub run_id: String,
        #[prost(bool, tag = "3")]
        pub started: bool,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct HealthCheckRequest {
        #[prost(string, tag = "1")]
        pub service: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct HealthCheckResponse {
        #[prost(int32, tag = "1")]
        pub status: i32,
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens tonic channels to the engine frontend
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    connect_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Connection = Channel;

    async fn attempt(&self, address: &EngineAddress) -> Result<Channel, AttemptError> {
        if address.is_tls() {
            return Err(AttemptError::Fatal(
                "TLS engine endpoints are not supported by this build".to_string(),
            ));
        }

        let endpoint = Endpoint::from_shared(address.uri())
            .map_err(|e| AttemptError::Fatal(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.connect_timeout * 6);

        endpoint
            .connect()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))
    }
}

// =============================================================================
// Client
// =============================================================================

/// [`WorkflowStarter`] backed by the engine's gRPC frontend
#[derive(Debug, Clone)]
pub struct GrpcEngineClient {
    channel: Channel,
    namespace: String,
    identity: String,
    ping_timeout: Duration,
}

impl GrpcEngineClient {
    pub fn new(channel: Channel, namespace: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            channel,
            namespace: namespace.into(),
            identity: identity.into(),
            ping_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Build the wire request for a start
    pub fn build_request(
        &self,
        request: &StartRequest,
    ) -> Result<proto::StartWorkflowExecutionRequest, EngineError> {
        let data = serde_json::to_vec(&request.input)?;
        let metadata = HashMap::from([(
            PAYLOAD_ENCODING_KEY.to_string(),
            PAYLOAD_ENCODING_JSON.to_vec(),
        )]);

        Ok(proto::StartWorkflowExecutionRequest {
            namespace: self.namespace.clone(),
            workflow_id: request.workflow_id.clone(),
            workflow_type: Some(proto::WorkflowType {
                name: request.workflow_type.clone(),
            }),
            task_queue: Some(proto::TaskQueue {
                name: request.task_queue.clone(),
                kind: TASK_QUEUE_KIND_NORMAL,
            }),
            input: Some(proto::Payloads {
                payloads: vec![proto::Payload { metadata, data }],
            }),
            identity: self.identity.clone(),
            request_id: Uuid::now_v7().to_string(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| {
            Status::new(Code::Unavailable, format!("Service was not ready: {e}"))
        })?;

        let codec = ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(
                tonic::Request::new(message),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

fn engine_error(workflow_id: &str, status: Status) -> EngineError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            EngineError::Transport(status.message().to_string())
        }
        _ => EngineError::Rejected {
            workflow_id: workflow_id.to_string(),
            message: format!("{:?}: {}", status.code(), status.message()),
        },
    }
}

#[async_trait]
impl WorkflowStarter for GrpcEngineClient {
    async fn start_workflow(&self, request: StartRequest) -> Result<StartedWorkflow, EngineError> {
        let wire = self.build_request(&request)?;
        debug!(
            workflow_id = %wire.workflow_id,
            request_id = %wire.request_id,
            namespace = %wire.namespace,
            "Sending StartWorkflowExecution"
        );

        let response: proto::StartWorkflowExecutionResponse = self
            .unary(START_WORKFLOW_PATH, wire)
            .await
            .map_err(|status| engine_error(&request.workflow_id, status))?;

        Ok(StartedWorkflow {
            workflow_id: request.workflow_id,
            run_id: response.run_id,
        })
    }

    async fn ping(&self) -> bool {
        let probe = self.unary::<_, proto::HealthCheckResponse>(
            HEALTH_CHECK_PATH,
            proto::HealthCheckRequest {
                service: WORKFLOW_SERVICE.to_string(),
            },
        );

        match tokio::time::timeout(self.ping_timeout, probe).await {
            Ok(Ok(response)) => response.status == HEALTH_SERVING,
            Ok(Err(status)) => {
                warn!(code = ?status.code(), error = %status.message(), "Engine health probe failed");
                false
            }
            Err(_) => {
                warn!("Engine health probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use serde_json::json;

    fn client() -> GrpcEngineClient {
        let channel = Endpoint::from_static("http://127.0.0.1:7233").connect_lazy();
        GrpcEngineClient::new(channel, "default", "flowgate-worker-test")
    }

    fn start_request() -> StartRequest {
        StartRequest {
            workflow_id: "event-incident-1".to_string(),
            workflow_name: "incident_workflow".to_string(),
            workflow_type: "IncidentWorkflow".to_string(),
            task_queue: "incident_workflow-queue".to_string(),
            input: json!({"eventType": "incident", "source": "pagerduty"}),
            parent_session_id: None,
        }
    }

    #[tokio::test]
    async fn test_build_request_shape() {
        let wire = client().build_request(&start_request()).unwrap();

        assert_eq!(wire.namespace, "default");
        assert_eq!(wire.workflow_id, "event-incident-1");
        assert_eq!(wire.identity, "flowgate-worker-test");
        assert_eq!(wire.workflow_type.unwrap().name, "IncidentWorkflow");
        let queue = wire.task_queue.unwrap();
        assert_eq!(queue.name, "incident_workflow-queue");
        assert_eq!(queue.kind, TASK_QUEUE_KIND_NORMAL);
        assert!(Uuid::parse_str(&wire.request_id).is_ok());

        let payload = &wire.input.unwrap().payloads[0];
        assert_eq!(payload.metadata["encoding"], b"json/plain".to_vec());
        let input: serde_json::Value = serde_json::from_slice(&payload.data).unwrap();
        assert_eq!(input["source"], "pagerduty");
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let client = client();
        let a = client.build_request(&start_request()).unwrap();
        let b = client.build_request(&start_request()).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_wire_encoding_round_trips() {
        let request = proto::StartWorkflowExecutionRequest {
            namespace: "default".to_string(),
            workflow_id: "wf".to_string(),
            identity: "me".to_string(),
            request_id: "r".to_string(),
            ..Default::default()
        };
        let bytes = request.encode_to_vec();
        let decoded = proto::StartWorkflowExecutionRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            engine_error("wf", Status::unavailable("down")),
            EngineError::Transport(_)
        ));
        assert!(matches!(
            engine_error("wf", Status::already_exists("dup")),
            EngineError::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_tls_address_is_fatal() {
        let address = EngineAddress::parse("https://engine:443").unwrap();
        let err = GrpcConnector::default().attempt(&address).await.unwrap_err();
        assert!(matches!(err, AttemptError::Fatal(_)));
    }
}
