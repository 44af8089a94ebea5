//! In-process media engine that speaks the netstring protocol over socket pairs and answers
//! requests the way the real one would, with just enough bookkeeping to send the notifications
//! tests depend on.

use async_io::{Async, Timer};
use futures_lite::io::BufReader;
use futures_lite::{
    future, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sfu_control::data_structures::AppData;
use sfu_control::worker::{Worker, WorkerEndpoints};
use sfu_control::worker_manager::WorkerManager;
use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, thread};

static NEXT_PID: AtomicU32 = AtomicU32::new(10_000);

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct TransportRecord {
    router_id: String,
    local_port: u16,
}

#[derive(Debug)]
struct ProducerRecord {
    transport_id: String,
    paused: bool,
}

#[derive(Debug)]
struct ConsumerRecord {
    producer_id: String,
    transport_id: String,
}

/// What the engine knows about objects created on it.
#[derive(Debug, Default)]
struct Objects {
    routers: Vec<String>,
    transports: HashMap<String, TransportRecord>,
    rtp_observers: HashMap<String, String>,
    producers: HashMap<String, ProducerRecord>,
    consumers: HashMap<String, ConsumerRecord>,
    data_producers: HashMap<String, String>,
    data_consumers: HashMap<String, ConsumerRecord>,
}

struct State {
    pid: u32,
    requests: Mutex<Vec<Value>>,
    payload_messages: Mutex<Vec<(Value, Vec<u8>)>>,
    rejections: Mutex<HashMap<String, String>>,
    objects: Mutex<Objects>,
    next_port: AtomicU16,
    control_sender: async_channel::Sender<Vec<u8>>,
    payload_sender: async_channel::Sender<Vec<u8>>,
    crash_sender: async_channel::Sender<()>,
}

fn netstring(frame: &[u8]) -> Vec<u8> {
    let mut bytes = format!("{}:", frame.len()).into_bytes();
    bytes.extend_from_slice(frame);
    bytes.push(b',');
    bytes
}

fn json_netstring(message: &Value) -> Vec<u8> {
    netstring(&serde_json::to_vec(message).unwrap())
}

async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
    let mut length = Vec::new();
    if reader.read_until(b':', &mut length).await.ok()? == 0 {
        return None;
    }
    length.pop();
    let length: usize = std::str::from_utf8(&length).ok()?.parse().ok()?;

    let mut frame = vec![0_u8; length + 1];
    reader.read_exact(&mut frame).await.ok()?;
    frame.pop();

    Some(frame)
}

async fn write_frames<W: AsyncWrite + Unpin>(
    mut writer: W,
    receiver: async_channel::Receiver<Vec<u8>>,
) {
    while let Ok(bytes) = receiver.recv().await {
        if writer.write_all(&bytes).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn sctp_parameters(data: &Value) -> Value {
    json!({
        "port": 5000,
        "OS": data["numSctpStreams"]["OS"],
        "MIS": data["numSctpStreams"]["MIS"],
        "maxMessageSize": data["maxSctpMessageSize"],
    })
}

impl State {
    fn add_transport(&self, request: &Value) -> u16 {
        let local_port = self.next_port.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().transports.insert(
            str_at(request, "/internal/transportId").to_string(),
            TransportRecord {
                router_id: str_at(request, "/internal/routerId").to_string(),
                local_port,
            },
        );
        local_port
    }

    /// Response data and notifications that follow the response.
    fn handle_request(&self, method: &str, request: &Value) -> (Value, Vec<Value>) {
        let data = &request["data"];
        let mut notifications = Vec::new();

        let response = match method {
            "worker.dump" => json!({
                "pid": self.pid,
                "routerIds": self.objects.lock().routers,
            }),
            "worker.createRouter" => {
                self.objects
                    .lock()
                    .routers
                    .push(str_at(request, "/internal/routerId").to_string());
                Value::Null
            }
            "router.close" => {
                let router_id = str_at(request, "/internal/routerId");
                let mut objects = self.objects.lock();
                objects.routers.retain(|id| id != router_id);
                objects
                    .transports
                    .retain(|_, transport| transport.router_id != router_id);
                objects
                    .rtp_observers
                    .retain(|_, observer_router_id| observer_router_id != router_id);
                Value::Null
            }
            "router.dump" => {
                let router_id = str_at(request, "/internal/routerId");
                let objects = self.objects.lock();
                json!({
                    "id": router_id,
                    "transportIds": objects
                        .transports
                        .iter()
                        .filter(|(_, transport)| transport.router_id == router_id)
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                    "rtpObserverIds": objects
                        .rtp_observers
                        .iter()
                        .filter(|(_, observer_router_id)| *observer_router_id == router_id)
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                })
            }
            "worker.getResourceUsage" => json!({
                "ru_utime": 120, "ru_stime": 40, "ru_maxrss": 20480, "ru_ixrss": 0,
                "ru_idrss": 0, "ru_isrss": 0, "ru_minflt": 3000, "ru_majflt": 0,
                "ru_nswap": 0, "ru_inblock": 0, "ru_oublock": 8, "ru_msgsnd": 0,
                "ru_msgrcv": 0, "ru_nsignals": 0, "ru_nvcsw": 150, "ru_nivcsw": 12,
            }),
            "transport.dump" => {
                let transport_id = str_at(request, "/internal/transportId");
                let objects = self.objects.lock();
                let owned_by = |owner: &str| owner == transport_id;
                json!({
                    "id": transport_id,
                    "producerIds": objects
                        .producers
                        .iter()
                        .filter(|(_, producer)| owned_by(&producer.transport_id))
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                    "consumerIds": objects
                        .consumers
                        .iter()
                        .filter(|(_, consumer)| owned_by(&consumer.transport_id))
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                    "dataProducerIds": objects
                        .data_producers
                        .iter()
                        .filter(|(_, owner)| owned_by(owner))
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                    "dataConsumerIds": objects
                        .data_consumers
                        .iter()
                        .filter(|(_, data_consumer)| owned_by(&data_consumer.transport_id))
                        .map(|(id, _)| id)
                        .collect::<Vec<_>>(),
                    "maxMessageSize": 262144,
                })
            }
            "transport.getStats" => json!([{
                "type": "transport",
                "timestamp": 1000,
                "transportId": str_at(request, "/internal/transportId"),
                "bytesReceived": 0,
                "bytesSent": 0,
            }]),
            "router.createWebRtcTransport" => {
                let local_port = self.add_transport(request);
                let mut response = json!({
                    "iceRole": "controlled",
                    "iceParameters": {
                        "usernameFragment": "fake-ufrag",
                        "password": "fake-password",
                        "iceLite": true,
                    },
                    "iceCandidates": [{
                        "foundation": "udpcandidate",
                        "priority": 1076302079_u32,
                        "ip": data["listenIps"][0]["ip"],
                        "protocol": "udp",
                        "port": local_port,
                        "type": "host",
                    }],
                    "iceState": "new",
                    "dtlsParameters": {
                        "role": "auto",
                        "fingerprints": [],
                    },
                    "dtlsState": "new",
                });
                if data["enableSctp"] == true {
                    response["sctpParameters"] = sctp_parameters(data);
                    response["sctpState"] = json!("new");
                }
                response
            }
            "router.createPlainTransport" => {
                let local_port = self.add_transport(request);
                let mut response = json!({
                    "rtcpMux": data["rtcpMux"],
                    "comedia": data["comedia"],
                    "tuple": {
                        "localIp": data["listenIp"]["ip"],
                        "localPort": local_port,
                        "protocol": "udp",
                    },
                });
                if data["enableSctp"] == true {
                    response["sctpParameters"] = sctp_parameters(data);
                    response["sctpState"] = json!("new");
                }
                response
            }
            "router.createPipeTransport" => {
                let local_port = self.add_transport(request);
                let mut response = json!({
                    "tuple": {
                        "localIp": data["listenIp"]["ip"],
                        "localPort": local_port,
                        "protocol": "udp",
                    },
                    "rtx": data["enableRtx"],
                });
                if data["enableSctp"] == true {
                    response["sctpParameters"] = sctp_parameters(data);
                    response["sctpState"] = json!("new");
                }
                if data["enableSrtp"] == true {
                    response["srtpParameters"] = json!({
                        "cryptoSuite": "AES_CM_128_HMAC_SHA1_80",
                        "keyBase64": "ZnQ3eWJraDg0d3ZoYzM5cXN1Y2pnaHU5NWxrZTVv",
                    });
                }
                response
            }
            "router.createDirectTransport" => {
                self.add_transport(request);
                Value::Null
            }
            "router.createAudioLevelObserver" | "router.createActiveSpeakerObserver" => {
                self.objects.lock().rtp_observers.insert(
                    str_at(request, "/internal/rtpObserverId").to_string(),
                    str_at(request, "/internal/routerId").to_string(),
                );
                Value::Null
            }
            "rtpObserver.close" => {
                self.objects
                    .lock()
                    .rtp_observers
                    .remove(str_at(request, "/internal/rtpObserverId"));
                Value::Null
            }
            "transport.connect" => {
                let transport_id = str_at(request, "/internal/transportId");
                let local_port = self
                    .objects
                    .lock()
                    .transports
                    .get(transport_id)
                    .map_or(0, |transport| transport.local_port);
                let mut response = json!({ "dtlsLocalRole": "client" });
                if data.get("ip").is_some() {
                    response["tuple"] = json!({
                        "localIp": "127.0.0.1",
                        "localPort": local_port,
                        "remoteIp": data["ip"],
                        "remotePort": data["port"],
                        "protocol": "udp",
                    });
                }
                response
            }
            "transport.restartIce" => json!({
                "iceParameters": {
                    "usernameFragment": "fake-ufrag-2",
                    "password": "fake-password-2",
                    "iceLite": true,
                },
            }),
            "transport.close" => {
                let transport_id = str_at(request, "/internal/transportId");
                let mut objects = self.objects.lock();
                objects.transports.remove(transport_id);

                // Producers go away with their transport, so do their consumers elsewhere
                let producer_ids = objects
                    .producers
                    .iter()
                    .filter(|(_, producer)| producer.transport_id == transport_id)
                    .map(|(id, _)| id.clone())
                    .collect::<Vec<_>>();
                for producer_id in producer_ids {
                    objects.producers.remove(&producer_id);
                    notifications.extend(Self::close_consumers_of(&mut objects, &producer_id));
                }
                objects
                    .consumers
                    .retain(|_, consumer| consumer.transport_id != transport_id);
                objects
                    .data_consumers
                    .retain(|_, data_consumer| data_consumer.transport_id != transport_id);
                Value::Null
            }
            "transport.produce" => {
                self.objects.lock().producers.insert(
                    str_at(request, "/internal/producerId").to_string(),
                    ProducerRecord {
                        transport_id: str_at(request, "/internal/transportId").to_string(),
                        paused: data["paused"] == true,
                    },
                );
                let simulcast = data["rtpParameters"]["encodings"]
                    .as_array()
                    .map_or(false, |encodings| encodings.len() > 1);
                let r#type = if simulcast { "simulcast" } else { "simple" };
                json!({ "type": r#type })
            }
            "transport.consume" => {
                let producer_id = str_at(request, "/internal/producerId");
                let mut objects = self.objects.lock();
                let producer_paused = objects
                    .producers
                    .get(producer_id)
                    .map_or(false, |producer| producer.paused);
                objects.consumers.insert(
                    str_at(request, "/internal/consumerId").to_string(),
                    ConsumerRecord {
                        producer_id: producer_id.to_string(),
                        transport_id: str_at(request, "/internal/transportId").to_string(),
                    },
                );
                json!({
                    "paused": data["paused"],
                    "producerPaused": producer_paused,
                    "score": {
                        "score": 10,
                        "producerScore": 10,
                        "producerScores": [],
                    },
                    "preferredLayers": null,
                })
            }
            "transport.produceData" => {
                self.objects.lock().data_producers.insert(
                    str_at(request, "/internal/dataProducerId").to_string(),
                    str_at(request, "/internal/transportId").to_string(),
                );
                json!({
                    "type": data["type"],
                    "sctpStreamParameters": data["sctpStreamParameters"],
                    "label": data["label"],
                    "protocol": data["protocol"],
                })
            }
            "transport.consumeData" => {
                self.objects.lock().data_consumers.insert(
                    str_at(request, "/internal/dataConsumerId").to_string(),
                    ConsumerRecord {
                        producer_id: str_at(request, "/internal/dataProducerId").to_string(),
                        transport_id: str_at(request, "/internal/transportId").to_string(),
                    },
                );
                json!({
                    "type": data["type"],
                    "sctpStreamParameters": data["sctpStreamParameters"],
                    "label": data["label"],
                    "protocol": data["protocol"],
                })
            }
            "producer.close" => {
                let producer_id = str_at(request, "/internal/producerId");
                let mut objects = self.objects.lock();
                objects.producers.remove(producer_id);
                notifications.extend(Self::close_consumers_of(&mut objects, producer_id));
                Value::Null
            }
            "producer.pause" | "producer.resume" => {
                let producer_id = str_at(request, "/internal/producerId");
                let paused = method == "producer.pause";
                let mut objects = self.objects.lock();
                let changed = match objects.producers.get_mut(producer_id) {
                    Some(producer) if producer.paused != paused => {
                        producer.paused = paused;
                        true
                    }
                    _ => false,
                };
                if changed {
                    let event = if paused { "producerpause" } else { "producerresume" };
                    notifications.extend(
                        objects
                            .consumers
                            .iter()
                            .filter(|(_, consumer)| consumer.producer_id == producer_id)
                            .map(|(id, _)| json!({ "targetId": id, "event": event })),
                    );
                }
                Value::Null
            }
            "consumer.close" => {
                self.objects
                    .lock()
                    .consumers
                    .remove(str_at(request, "/internal/consumerId"));
                Value::Null
            }
            "dataProducer.close" => {
                let data_producer_id = str_at(request, "/internal/dataProducerId");
                let mut objects = self.objects.lock();
                objects.data_producers.remove(data_producer_id);
                let data_consumer_ids = objects
                    .data_consumers
                    .iter()
                    .filter(|(_, data_consumer)| data_consumer.producer_id == data_producer_id)
                    .map(|(id, _)| id.clone())
                    .collect::<Vec<_>>();
                for data_consumer_id in data_consumer_ids {
                    objects.data_consumers.remove(&data_consumer_id);
                    notifications
                        .push(json!({ "targetId": data_consumer_id, "event": "dataproducerclose" }));
                }
                Value::Null
            }
            "dataConsumer.close" => {
                self.objects
                    .lock()
                    .data_consumers
                    .remove(str_at(request, "/internal/dataConsumerId"));
                Value::Null
            }
            "dataConsumer.getBufferedAmount" => json!({ "bufferedAmount": 0 }),
            _ => Value::Null,
        };

        (response, notifications)
    }

    fn close_consumers_of(objects: &mut Objects, producer_id: &str) -> Vec<Value> {
        let consumer_ids = objects
            .consumers
            .iter()
            .filter(|(_, consumer)| consumer.producer_id == producer_id)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        consumer_ids
            .into_iter()
            .map(|consumer_id| {
                objects.consumers.remove(&consumer_id);
                json!({ "targetId": consumer_id, "event": "producerclose" })
            })
            .collect()
    }

    async fn serve_requests<R: AsyncRead + Unpin>(&self, reader: R) {
        let mut reader = BufReader::new(reader);

        while let Some(frame) = read_frame(&mut reader).await {
            let request: Value = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(_) => continue,
            };
            let method = str_at(&request, "/method").to_string();

            let rejection = self.rejections.lock().get(&method).cloned();
            let (response, notifications) = match rejection {
                Some(reason) => (
                    json!({ "id": request["id"], "error": "Error", "reason": reason }),
                    Vec::new(),
                ),
                None => {
                    let (data, notifications) = self.handle_request(&method, &request);
                    (
                        json!({ "id": request["id"], "accepted": true, "data": data }),
                        notifications,
                    )
                }
            };

            self.requests.lock().push(request);

            let _ = self.control_sender.try_send(json_netstring(&response));
            for notification in notifications {
                let _ = self.control_sender.try_send(json_netstring(&notification));
            }
        }
    }

    async fn serve_payload_messages<R: AsyncRead + Unpin>(&self, reader: R) {
        let mut reader = BufReader::new(reader);

        loop {
            let header = match read_frame(&mut reader).await {
                Some(header) => header,
                None => break,
            };
            let payload = match read_frame(&mut reader).await {
                Some(payload) => payload,
                None => break,
            };
            let header: Value = match serde_json::from_slice(&header) {
                Ok(header) => header,
                Err(_) => continue,
            };

            let response = header
                .get("method")
                .map(|_| json!({ "id": header["id"], "accepted": true }));
            self.payload_messages.lock().push((header, payload));
            if let Some(response) = response {
                let _ = self.payload_sender.try_send(json_netstring(&response));
            }
        }
    }
}

/// Handle to an engine running on its own thread.
#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<State>,
}

impl FakeEngine {
    /// Starts the engine, returns the streams a worker needs to talk to it.
    pub fn start() -> (WorkerEndpoints, Self) {
        let pid = NEXT_PID.fetch_add(1, Ordering::SeqCst);

        let (channel_reader, engine_channel_writer) = Async::<UnixStream>::pair().unwrap();
        let (engine_channel_reader, channel_writer) = Async::<UnixStream>::pair().unwrap();
        let (payload_channel_reader, engine_payload_writer) = Async::<UnixStream>::pair().unwrap();
        let (engine_payload_reader, payload_channel_writer) = Async::<UnixStream>::pair().unwrap();

        let (control_sender, control_receiver) = async_channel::unbounded::<Vec<u8>>();
        let (payload_sender, payload_receiver) = async_channel::unbounded::<Vec<u8>>();
        let (crash_sender, crash_receiver) = async_channel::bounded::<()>(1);

        let state = Arc::new(State {
            pid,
            requests: Mutex::default(),
            payload_messages: Mutex::default(),
            rejections: Mutex::default(),
            objects: Mutex::default(),
            next_port: AtomicU16::new(40_000),
            control_sender,
            payload_sender,
            crash_sender,
        });

        let _ = state.control_sender.try_send(json_netstring(&json!({
            "targetId": pid.to_string(),
            "event": "running",
        })));

        {
            let state = Arc::clone(&state);

            thread::spawn(move || {
                future::block_on(async move {
                    let serving = future::or(
                        state.serve_requests(engine_channel_reader),
                        state.serve_payload_messages(engine_payload_reader),
                    );
                    let writing = future::zip(
                        write_frames(engine_channel_writer, control_receiver),
                        write_frames(engine_payload_writer, payload_receiver),
                    );
                    let crash = async {
                        if crash_receiver.recv().await.is_err() {
                            future::pending::<()>().await;
                        }
                    };

                    future::or(
                        future::or(serving, async {
                            writing.await;
                        }),
                        crash,
                    )
                    .await;
                });
            });
        }

        let endpoints = WorkerEndpoints::new(
            pid,
            channel_reader,
            channel_writer,
            payload_channel_reader,
            payload_channel_writer,
        );

        (endpoints, Self { state })
    }

    pub fn pid(&self) -> u32 {
        self.state.pid
    }

    /// Every control request received so far with given method.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request["method"] == method)
            .cloned()
            .collect()
    }

    /// Waits until at least `count` requests with given method were received.
    pub async fn wait_for_requests(&self, method: &str, count: usize) -> Vec<Value> {
        let started = Instant::now();
        loop {
            let requests = self.requests(method);
            if requests.len() >= count {
                return requests;
            }
            assert!(
                started.elapsed() < WAIT_LIMIT,
                "Engine didn't receive {} {} request(s)",
                count,
                method
            );
            Timer::after(Duration::from_millis(10)).await;
        }
    }

    /// Payload channel messages (header and payload) received so far with given event or method.
    pub fn payload_messages(&self, name: &str) -> Vec<(Value, Vec<u8>)> {
        self.state
            .payload_messages
            .lock()
            .iter()
            .filter(|(header, _)| header["event"] == name || header["method"] == name)
            .cloned()
            .collect()
    }

    pub async fn wait_for_payload_messages(
        &self,
        name: &str,
        count: usize,
    ) -> Vec<(Value, Vec<u8>)> {
        let started = Instant::now();
        loop {
            let messages = self.payload_messages(name);
            if messages.len() >= count {
                return messages;
            }
            assert!(
                started.elapsed() < WAIT_LIMIT,
                "Engine didn't receive {} {} payload message(s)",
                count,
                name
            );
            Timer::after(Duration::from_millis(10)).await;
        }
    }

    /// Requests with given method will be rejected with `reason` from now on.
    pub fn reject(&self, method: &str, reason: &str) {
        self.state
            .rejections
            .lock()
            .insert(method.to_string(), reason.to_string());
    }

    /// Stops rejecting requests with given method.
    pub fn accept(&self, method: &str) {
        self.state.rejections.lock().remove(method);
    }

    /// Sends a control channel notification.
    pub fn notify(&self, target_id: impl ToString, event: &str, data: Value) {
        let _ = self.state.control_sender.try_send(json_netstring(&json!({
            "targetId": target_id.to_string(),
            "event": event,
            "data": data,
        })));
    }

    /// Sends a payload channel notification followed by its payload.
    pub fn notify_with_payload(
        &self,
        target_id: impl ToString,
        event: &str,
        data: Value,
        payload: &[u8],
    ) {
        let mut bytes = json_netstring(&json!({
            "targetId": target_id.to_string(),
            "event": event,
            "data": data,
        }));
        bytes.extend(netstring(payload));
        let _ = self.state.payload_sender.try_send(bytes);
    }

    /// Engine goes away without answering anything else.
    pub fn crash(&self) {
        let _ = self.state.crash_sender.try_send(());
    }
}

fn init_logging() {
    let mut builder = env_logger::builder();
    if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
        builder.filter_level(log::LevelFilter::Off);
    }
    let _ = builder.is_test(true).try_init();
}

/// Worker backed by a fresh fake engine.
pub async fn create_worker() -> (Worker, FakeEngine) {
    init_logging();

    let (endpoints, engine) = FakeEngine::start();
    let worker_manager = WorkerManager::new(PathBuf::from("fake-engine"));

    let worker = worker_manager
        .create_worker_with_endpoints(endpoints, AppData::default())
        .await
        .expect("Failed to create worker");

    (worker, engine)
}

/// Gives fire-and-forget requests time to reach the engine.
pub async fn settle() {
    Timer::after(Duration::from_millis(100)).await;
}
