//! Wire types for the sensor event stream.
//!
//! The aggregation service exposes a single client-streaming RPC: the sensor
//! opens a stream, sends any number of [`SensorEvent`] messages, half-closes,
//! and receives one [`StreamAck`] in return. The messages and the service
//! stubs are written by hand against `prost`/`tonic` rather than generated
//! from a `.proto`, so the schema lives in one place with the rest of the
//! crate.

/// One coalesced event: the identity fields shared by every occurrence, plus
/// a growing array of per-occurrence [`Metric`] records.
#[allow(missing_docs)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SensorEvent {
    /// Opaque sensor identifier, stamped from configuration.
    #[prost(string, tag = "1")]
    pub sensor_id: String,
    /// Version of the sensor software that produced the event.
    #[prost(string, tag = "2")]
    pub sensor_version: String,
    /// Hex-encoded SHA-256 over the canonical identity projection.
    #[prost(string, tag = "3")]
    pub event_hash_sha256: String,
    /// Microseconds since epoch at which the sensor read the alert line.
    #[prost(int64, tag = "4")]
    pub event_read_at: i64,
    /// Microseconds since epoch, stamped immediately before transmit.
    #[prost(int64, tag = "5")]
    pub event_sent_at: i64,
    /// Microseconds since epoch, stamped by the aggregator on receipt.
    /// Always zero on the sensor side.
    #[prost(int64, tag = "6")]
    pub event_received_at: i64,
    /// Length of `metrics`, maintained on every append.
    #[prost(int64, tag = "7")]
    pub event_metrics_count: i64,
    #[prost(string, optional, tag = "8")]
    pub snort_action: Option<String>,
    #[prost(string, optional, tag = "9")]
    pub snort_classification: Option<String>,
    #[prost(string, optional, tag = "10")]
    pub snort_direction: Option<String>,
    #[prost(string, tag = "11")]
    pub snort_interface: String,
    #[prost(string, tag = "12")]
    pub snort_message: String,
    #[prost(int64, tag = "13")]
    pub snort_priority: i64,
    #[prost(string, tag = "14")]
    pub snort_protocol: String,
    #[prost(int64, tag = "15")]
    pub snort_rule_gid: i64,
    #[prost(int64, tag = "16")]
    pub snort_rule_rev: i64,
    #[prost(int64, tag = "17")]
    pub snort_rule_sid: i64,
    /// Composite rule string, e.g. `"1:54307:1"`.
    #[prost(string, tag = "18")]
    pub snort_rule: String,
    /// Alert timestamp truncated to the second.
    #[prost(int64, tag = "19")]
    pub snort_seconds: i64,
    #[prost(string, optional, tag = "20")]
    pub snort_service: Option<String>,
    #[prost(int64, optional, tag = "21")]
    pub snort_type_of_service: Option<i64>,
    /// One entry per coalesced occurrence, in append order.
    #[prost(message, repeated, tag = "22")]
    pub metrics: Vec<Metric>,
}

/// Per-occurrence fields of a single alert line.
#[allow(missing_docs)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    /// Raw Snort timestamp string, e.g. `"24/10/10-05:32:11.000107"`.
    #[prost(string, tag = "1")]
    pub snort_timestamp: String,
    #[prost(string, optional, tag = "2")]
    pub snort_base64_data: Option<String>,
    #[prost(int64, optional, tag = "3")]
    pub snort_client_bytes: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub snort_client_pkts: Option<i64>,
    #[prost(int64, optional, tag = "5")]
    pub snort_server_bytes: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub snort_server_pkts: Option<i64>,
    #[prost(string, optional, tag = "7")]
    pub snort_src_address: Option<String>,
    #[prost(int64, optional, tag = "8")]
    pub snort_src_port: Option<i64>,
    #[prost(string, optional, tag = "9")]
    pub snort_src_ap: Option<String>,
    #[prost(string, optional, tag = "10")]
    pub snort_dst_address: Option<String>,
    #[prost(int64, optional, tag = "11")]
    pub snort_dst_port: Option<i64>,
    #[prost(string, optional, tag = "12")]
    pub snort_dst_ap: Option<String>,
    #[prost(string, optional, tag = "13")]
    pub snort_eth_src: Option<String>,
    #[prost(string, optional, tag = "14")]
    pub snort_eth_dst: Option<String>,
    #[prost(string, optional, tag = "15")]
    pub snort_eth_type: Option<String>,
    #[prost(int64, optional, tag = "16")]
    pub snort_eth_len: Option<i64>,
    #[prost(int64, optional, tag = "17")]
    pub snort_flowstart_time: Option<i64>,
    #[prost(int64, optional, tag = "18")]
    pub snort_geneve_vni: Option<i64>,
    #[prost(int64, optional, tag = "19")]
    pub snort_icmp_code: Option<i64>,
    #[prost(int64, optional, tag = "20")]
    pub snort_icmp_id: Option<i64>,
    #[prost(int64, optional, tag = "21")]
    pub snort_icmp_seq: Option<i64>,
    #[prost(int64, optional, tag = "22")]
    pub snort_icmp_type: Option<i64>,
    #[prost(int64, optional, tag = "23")]
    pub snort_ip_id: Option<i64>,
    #[prost(int64, optional, tag = "24")]
    pub snort_ip_length: Option<i64>,
    #[prost(int64, optional, tag = "25")]
    pub snort_mpls: Option<i64>,
    #[prost(string, optional, tag = "26")]
    pub snort_pkt_gen: Option<String>,
    #[prost(int64, optional, tag = "27")]
    pub snort_pkt_length: Option<i64>,
    #[prost(int64, optional, tag = "28")]
    pub snort_pkt_number: Option<i64>,
    #[prost(int64, optional, tag = "29")]
    pub snort_sgt: Option<i64>,
    #[prost(string, optional, tag = "30")]
    pub snort_target: Option<String>,
    #[prost(int64, optional, tag = "31")]
    pub snort_tcp_ack: Option<i64>,
    #[prost(string, optional, tag = "32")]
    pub snort_tcp_flags: Option<String>,
    #[prost(int64, optional, tag = "33")]
    pub snort_tcp_len: Option<i64>,
    #[prost(int64, optional, tag = "34")]
    pub snort_tcp_seq: Option<i64>,
    #[prost(int64, optional, tag = "35")]
    pub snort_tcp_win: Option<i64>,
    #[prost(int64, optional, tag = "36")]
    pub snort_time_to_live: Option<i64>,
    #[prost(int64, optional, tag = "37")]
    pub snort_udp_length: Option<i64>,
    #[prost(int64, optional, tag = "38")]
    pub snort_vlan: Option<i64>,
}

/// The aggregator's single reply, sent after the client half-closes.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StreamAck {}

/// Client stub for the sensor event stream.
pub mod sensor_service_client {
    #![allow(unused_variables, dead_code, clippy::wildcard_imports)]
    use tonic::codegen::*;

    /// Client for the `mataelang.v2.SensorService` RPC service.
    #[derive(Debug, Clone)]
    pub struct SensorServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl SensorServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> SensorServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        /// Wraps an already-established transport.
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        /// Limits the maximum size of a decoded message.
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        /// Limits the maximum size of an encoded message.
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_encoding_message_size(limit);
            self
        }

        /// Opens the client-streaming upload. The future resolves to the
        /// aggregator's [`super::StreamAck`] once the request stream is
        /// exhausted (the client half-closes by dropping its end).
        pub async fn stream_events(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::SensorEvent>,
        ) -> Result<tonic::Response<super::StreamAck>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/mataelang.v2.SensorService/StreamEvents");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("mataelang.v2.SensorService", "StreamEvents"));
            self.inner.client_streaming(req, path, codec).await
        }
    }
}

/// Server stub for the sensor event stream. The shipped binary is a client
/// only; this exists so integration tests can run an in-process aggregator.
pub mod sensor_service_server {
    #![allow(unused_variables, dead_code, clippy::wildcard_imports)]
    use tonic::codegen::*;

    /// Handler trait for the `mataelang.v2.SensorService` RPC service.
    #[async_trait]
    pub trait SensorService: std::marker::Send + std::marker::Sync + 'static {
        /// Consumes one client stream of events and acknowledges it.
        async fn stream_events(
            &self,
            request: tonic::Request<tonic::Streaming<super::SensorEvent>>,
        ) -> Result<tonic::Response<super::StreamAck>, tonic::Status>;
    }

    /// Tower service wrapping a [`SensorService`] implementation.
    #[derive(Debug)]
    pub struct SensorServiceServer<T> {
        inner: Arc<T>,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }

    impl<T> SensorServiceServer<T> {
        /// Wraps a handler implementation.
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        /// Wraps an already shared handler implementation.
        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner, max_decoding_message_size: None, max_encoding_message_size: None }
        }

        /// Limits the maximum size of a decoded message.
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }

        /// Limits the maximum size of an encoded message.
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for SensorServiceServer<T>
    where
        T: SensorService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/mataelang.v2.SensorService/StreamEvents" => {
                    #[allow(non_camel_case_types)]
                    struct StreamEventsSvc<T: SensorService>(pub Arc<T>);
                    impl<T: SensorService> tonic::server::ClientStreamingService<super::SensorEvent>
                        for StreamEventsSvc<T>
                    {
                        type Response = super::StreamAck;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<super::SensorEvent>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as SensorService>::stream_events(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = Arc::clone(&self.inner);
                    let fut = async move {
                        let method = StreamEventsSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.client_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers
                        .insert(tonic::Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
                    headers.insert(http::header::CONTENT_TYPE, tonic::metadata::GRPC_CONTENT_TYPE);
                    Ok(response)
                }),
            }
        }
    }

    impl<T> Clone for SensorServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }

    impl<T> tonic::server::NamedService for SensorServiceServer<T> {
        const NAME: &'static str = "mataelang.v2.SensorService";
    }
}
