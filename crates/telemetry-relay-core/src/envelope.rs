//! Telemetry envelope model.
//!
//! An [`Envelope`] wraps exactly one telemetry event (log line, metric, HTTP
//! span, error or container sample) together with its origin. Envelopes are
//! protobuf messages; the transport only ever looks at their encoded length.
//!
//! The message types are declared with `prost` derives directly, so no build
//! script or `.proto` compilation step is needed.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of event carried by an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    HttpStart = 2,
    HttpStop = 3,
    HttpStartStop = 4,
    LogMessage = 5,
    ValueMetric = 6,
    CounterEvent = 7,
    Error = 8,
    ContainerMetric = 9,
}

impl EventType {
    /// Every event type, in wire-value order.
    pub const ALL: [EventType; 8] = [
        EventType::HttpStart,
        EventType::HttpStop,
        EventType::HttpStartStop,
        EventType::LogMessage,
        EventType::ValueMetric,
        EventType::CounterEvent,
        EventType::Error,
        EventType::ContainerMetric,
    ];

    /// Stable lowercase name, used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpStart => "http_start",
            Self::HttpStop => "http_stop",
            Self::HttpStartStop => "http_start_stop",
            Self::LogMessage => "log_message",
            Self::ValueMetric => "value_metric",
            Self::CounterEvent => "counter_event",
            Self::Error => "error",
            Self::ContainerMetric => "container_metric",
        }
    }
}

/// Stream a log line was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Out = 1,
    Err = 2,
}

/// Which side of an HTTP exchange emitted the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PeerType {
    Client = 1,
    Server = 2,
}

/// HTTP request method. Values outside this list still decode and are kept
/// as raw integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
    Head = 5,
    Connect = 11,
    Options = 24,
    Patch = 26,
    Trace = 36,
}

/// 128-bit request identifier split into two little-endian halves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Uuid {
    #[prost(uint64, tag = "1")]
    pub low: u64,
    #[prost(uint64, tag = "2")]
    pub high: u64,
}

impl Uuid {
    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self {
            low: value as u64,
            high: (value >> 64) as u64,
        }
    }

    #[must_use]
    pub fn as_u128(&self) -> u128 {
        (u128::from(self.high) << 64) | u128::from(self.low)
    }
}

/// A single telemetry event plus routing metadata.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub origin: String,
    #[prost(enumeration = "EventType", tag = "2")]
    pub event_type: i32,
    /// Nanoseconds since the Unix epoch.
    #[prost(int64, tag = "6")]
    pub timestamp: i64,
    #[prost(string, tag = "13")]
    pub deployment: String,
    #[prost(string, tag = "14")]
    pub job: String,
    #[prost(string, tag = "15")]
    pub index: String,
    #[prost(string, tag = "16")]
    pub ip: String,
    #[prost(map = "string, string", tag = "17")]
    pub tags: HashMap<String, String>,
    #[prost(message, optional, tag = "4")]
    pub http_start: Option<HttpStart>,
    #[prost(message, optional, tag = "5")]
    pub http_stop: Option<HttpStop>,
    #[prost(message, optional, tag = "7")]
    pub http_start_stop: Option<HttpStartStop>,
    #[prost(message, optional, tag = "8")]
    pub log_message: Option<LogMessage>,
    #[prost(message, optional, tag = "9")]
    pub value_metric: Option<ValueMetric>,
    #[prost(message, optional, tag = "10")]
    pub counter_event: Option<CounterEvent>,
    #[prost(message, optional, tag = "11")]
    pub error: Option<ErrorEvent>,
    #[prost(message, optional, tag = "12")]
    pub container_metric: Option<ContainerMetric>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStart {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "2")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "3")]
    pub peer_type: i32,
    #[prost(enumeration = "Method", tag = "4")]
    pub method: i32,
    #[prost(string, tag = "5")]
    pub uri: String,
    #[prost(string, tag = "6")]
    pub remote_address: String,
    #[prost(string, tag = "7")]
    pub user_agent: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStop {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub uri: String,
    #[prost(message, optional, tag = "3")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "4")]
    pub peer_type: i32,
    #[prost(int32, tag = "5")]
    pub status_code: i32,
    #[prost(int64, tag = "6")]
    pub content_length: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStartStop {
    #[prost(int64, tag = "1")]
    pub start_timestamp: i64,
    #[prost(int64, tag = "2")]
    pub stop_timestamp: i64,
    #[prost(message, optional, tag = "3")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "4")]
    pub peer_type: i32,
    #[prost(enumeration = "Method", tag = "5")]
    pub method: i32,
    #[prost(string, tag = "6")]
    pub uri: String,
    #[prost(string, tag = "7")]
    pub remote_address: String,
    #[prost(string, tag = "8")]
    pub user_agent: String,
    #[prost(int32, tag = "9")]
    pub status_code: i32,
    #[prost(int64, tag = "10")]
    pub content_length: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub message: Vec<u8>,
    #[prost(enumeration = "MessageType", tag = "2")]
    pub message_type: i32,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub app_id: String,
    #[prost(string, tag = "5")]
    pub source_type: String,
    #[prost(string, tag = "6")]
    pub source_instance: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueMetric {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(string, tag = "3")]
    pub unit: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CounterEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub delta: u64,
    #[prost(uint64, tag = "3")]
    pub total: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorEvent {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerMetric {
    #[prost(string, tag = "1")]
    pub application_id: String,
    #[prost(int32, tag = "2")]
    pub instance_index: i32,
    #[prost(double, tag = "3")]
    pub cpu_percentage: f64,
    #[prost(uint64, tag = "4")]
    pub memory_bytes: u64,
    #[prost(uint64, tag = "5")]
    pub disk_bytes: u64,
}

/// One event of any kind, used to build an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    HttpStart(HttpStart),
    HttpStop(HttpStop),
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(ErrorEvent),
    ContainerMetric(ContainerMetric),
}

impl Event {
    /// Event type tag for this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::HttpStart(_) => EventType::HttpStart,
            Self::HttpStop(_) => EventType::HttpStop,
            Self::HttpStartStop(_) => EventType::HttpStartStop,
            Self::LogMessage(_) => EventType::LogMessage,
            Self::ValueMetric(_) => EventType::ValueMetric,
            Self::CounterEvent(_) => EventType::CounterEvent,
            Self::Error(_) => EventType::Error,
            Self::ContainerMetric(_) => EventType::ContainerMetric,
        }
    }
}

macro_rules! impl_event_from {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Event {
                fn from(value: $ty) -> Self {
                    Event::$variant(value)
                }
            }
        )*
    };
}

impl_event_from! {
    HttpStart => HttpStart,
    HttpStop => HttpStop,
    HttpStartStop => HttpStartStop,
    LogMessage => LogMessage,
    ValueMetric => ValueMetric,
    CounterEvent => CounterEvent,
    ErrorEvent => Error,
    ContainerMetric => ContainerMetric,
}

/// Current time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

impl Envelope {
    /// Wrap an event, stamping the current time.
    pub fn wrap(origin: impl Into<String>, event: impl Into<Event>) -> Self {
        let event = event.into();
        let mut envelope = Self {
            origin: origin.into(),
            timestamp: now_nanos(),
            ..Default::default()
        };
        envelope.set_event_type(event.event_type());
        match event {
            Event::HttpStart(e) => envelope.http_start = Some(e),
            Event::HttpStop(e) => envelope.http_stop = Some(e),
            Event::HttpStartStop(e) => envelope.http_start_stop = Some(e),
            Event::LogMessage(e) => envelope.log_message = Some(e),
            Event::ValueMetric(e) => envelope.value_metric = Some(e),
            Event::CounterEvent(e) => envelope.counter_event = Some(e),
            Event::Error(e) => envelope.error = Some(e),
            Event::ContainerMetric(e) => envelope.container_metric = Some(e),
        }
        envelope
    }

    /// Attach a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl LogMessage {
    pub fn new(
        message_type: MessageType,
        message: impl Into<Vec<u8>>,
        app_id: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        let mut log = Self {
            message: message.into(),
            timestamp: now_nanos(),
            app_id: app_id.into(),
            source_type: source_type.into(),
            ..Default::default()
        };
        log.set_message_type(message_type);
        log
    }
}

impl ValueMetric {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

impl CounterEvent {
    pub fn new(name: impl Into<String>, delta: u64) -> Self {
        Self {
            name: name.into(),
            delta,
            total: 0,
        }
    }
}

impl ErrorEvent {
    pub fn new(source: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            code,
            message: message.into(),
        }
    }
}

impl ContainerMetric {
    pub fn new(
        application_id: impl Into<String>,
        instance_index: i32,
        cpu_percentage: f64,
        memory_bytes: u64,
        disk_bytes: u64,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            instance_index,
            cpu_percentage,
            memory_bytes,
            disk_bytes,
        }
    }
}
