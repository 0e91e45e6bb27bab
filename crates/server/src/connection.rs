//! Per-connection handler.
//!
//! Serves one TCP connection for its lifetime: read a frame, parse,
//! dispatch, answer. Every response carries the server's Lamport value as
//! of after the request was processed. When the peer goes away the handler
//! removes the record this connection last wrote, provided no later writer
//! has taken it over.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use weathervane_clock::ClockHandle;
use weathervane_store::{now_epoch_ms, ExpiryPolicy, RecordStore};
use weathervane_wire::{read_frame, write_frame, Method, Request, Response};

pub struct Connection {
    store: Arc<RecordStore>,
    clock: ClockHandle,
    policy: ExpiryPolicy,
    peer_host: String,
    peer_port: u16,
    /// The station this connection last PUT. Its record's lifetime is tied
    /// to this connection staying open.
    owned_id: Option<String>,
}

impl Connection {
    pub fn new(
        store: Arc<RecordStore>,
        clock: ClockHandle,
        policy: ExpiryPolicy,
        peer: SocketAddr,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            peer_host: peer.ip().to_string(),
            peer_port: peer.port(),
            owned_id: None,
        }
    }

    /// Serve the connection until the peer closes or I/O fails.
    pub async fn serve(mut self, stream: TcpStream) {
        let m = weathervane_metrics::metrics();
        m.connections_open.inc();

        let (mut reader, mut writer) = stream.into_split();
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!(host = %self.peer_host, port = self.peer_port, "peer closed");
                    break;
                }
                Err(e) => {
                    tracing::debug!(host = %self.peer_host, port = self.peer_port, error = %e, "read failed");
                    break;
                }
            };

            let response = self.handle_frame(&frame).await;
            let status = response.status.to_string();
            m.responses_by_status.with_label_values(&[status.as_str()]).inc();

            if let Err(e) = write_frame(&mut writer, &response.render()).await {
                tracing::warn!(host = %self.peer_host, port = self.peer_port, error = %e, "write failed");
                break;
            }
        }

        self.cleanup_on_disconnect().await;
        m.connections_open.dec();
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Response {
        let Ok(text) = std::str::from_utf8(frame) else {
            return self.bad_request();
        };
        let request = match Request::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable request");
                return self.bad_request();
            }
        };

        let method = request.method.to_string();
        weathervane_metrics::metrics()
            .requests_by_method
            .with_label_values(&[method.as_str()])
            .inc();

        match request.method {
            Method::Get => self.handle_get(&request).await,
            Method::Put => self.handle_put(&request).await,
            Method::Sync => self.handle_sync(&request),
        }
    }

    /// 400 for a request we could not extract a peer Lamport value from.
    /// The clock still advances so the response carries a defined timestamp.
    fn bad_request(&self) -> Response {
        Response::new(400).with_lamport(self.clock.tick_for_internal())
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    async fn handle_get(&self, request: &Request) -> Response {
        // Target must be `/` or `/<id>`; anything deeper is invalid.
        let station = match request.target.strip_prefix('/') {
            Some(rest) if !rest.contains('/') => rest,
            _ => return self.bad_request(),
        };
        let Some(peer) = request.lamport_clock() else {
            return self.bad_request();
        };

        let lamport = self.clock.tick_for_request(peer);
        let now = now_epoch_ms();
        let seq = self.clock.update_count();

        if station.is_empty() {
            let mut bodies = Vec::new();
            for (_, record) in self.store.snapshot().await {
                if let Some(body) = record.body_if_fresh(now, seq, &self.policy).await {
                    bodies.push(body);
                }
            }
            return Response::new(200)
                .with_lamport(lamport)
                .with_body(format!("[{}]", bodies.join(",")));
        }

        let Some(record) = self.store.get(station).await else {
            return Response::new(400).with_lamport(lamport);
        };
        match record.body_if_fresh(now, seq, &self.policy).await {
            Some(body) => Response::new(200).with_lamport(lamport).with_body(body),
            None => Response::new(400).with_lamport(lamport),
        }
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    async fn handle_put(&mut self, request: &Request) -> Response {
        let Some(peer) = request.lamport_clock() else {
            return self.bad_request();
        };

        // An empty or non-object body is "nothing to store", not an error.
        let trimmed = request.body.trim();
        if trimmed.is_empty() || !trimmed.starts_with('{') {
            return Response::new(204).with_lamport(self.clock.tick_for_request(peer));
        }

        let parsed: serde_json::Value = match serde_json::from_str(&request.body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "PUT body is not valid JSON");
                return Response::new(500).with_lamport(self.clock.tick_for_request(peer));
            }
        };
        let station_id = match parsed.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Response::new(400).with_lamport(self.clock.tick_for_request(peer)),
        };

        // Admitted: clock and update counter move together.
        let (lamport, seq) = self.clock.tick_for_put(peer);
        weathervane_metrics::metrics().puts_admitted.inc();

        self.owned_id = Some(station_id.clone());
        let (record, created) = self.store.get_or_create(&station_id).await;
        let installed = record
            .merge(
                &request.body,
                peer,
                now_epoch_ms(),
                seq,
                &self.peer_host,
                self.peer_port,
            )
            .await;
        tracing::debug!(
            station = %station_id,
            peer_lamport = peer,
            seq,
            installed,
            "PUT processed"
        );

        let status = if created { 201 } else { 200 };
        Response::new(status).with_lamport(lamport)
    }

    // -----------------------------------------------------------------------
    // SYNC
    // -----------------------------------------------------------------------

    /// Clock synchronisation. The clock advances even when the peer sent no
    /// usable Lamport value.
    fn handle_sync(&self, request: &Request) -> Response {
        let peer = request.lamport_clock().unwrap_or(0);
        Response::new(200).with_lamport(self.clock.tick_for_request(peer))
    }

    // -----------------------------------------------------------------------
    // Disconnect cleanup
    // -----------------------------------------------------------------------

    /// A station's persistence is tied to the liveness of its last feeder:
    /// when this connection dies, the record it last wrote is removed. The
    /// store holds the record's exclusive lock across the origin check, the
    /// file delete, and the binding removal, so a later writer keeps the
    /// record and a merge can never slip in mid-removal.
    async fn cleanup_on_disconnect(&self) {
        let Some(id) = &self.owned_id else { return };
        let Some(record) = self.store.get(id).await else {
            return;
        };

        if self
            .store
            .remove_if_owned_by(id, &record, &self.peer_host, self.peer_port)
            .await
        {
            weathervane_metrics::metrics()
                .records_dropped_on_disconnect
                .inc();
            tracing::info!(
                station = %id,
                host = %self.peer_host,
                port = self.peer_port,
                "feeder disconnected, record removed"
            );
        }
    }
}
