//! Endpoint HTTP que expõe o registro no formato do Prometheus.

use enocean_core::LinkCounters;
use enocean_core::config::ExpositionConfig;
use enocean_core::exposition::{CONTENT_TYPE, render_link_totals, render_temperatures};
use enocean_core::registry::{DeviceNames, TemperatureRegistry};
use std::sync::Arc;
use tiny_http::{Header, Method, Response, Server};
use tracing::{debug, info, warn};

/// Estado lido a cada scrape.
pub struct ScrapeState {
    pub registry: TemperatureRegistry,
    pub names: DeviceNames,
    pub counters: Arc<LinkCounters>,
    pub exposition: ExpositionConfig,
    /// Porta serial, exibida na página inicial
    pub port: String,
}

/// Resposta já montada, independente do servidor HTTP.
#[derive(Debug, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ScrapeState {
    pub fn route(&self, method: &Method, url: &str) -> Reply {
        let path = url.split('?').next().unwrap_or(url);
        if !matches!(method, Method::Get | Method::Head) {
            return Reply {
                status: 405,
                content_type: "text/plain; charset=utf-8",
                body: "method not allowed\n".into(),
            };
        }

        match path {
            "/metrics" => Reply {
                status: 200,
                content_type: CONTENT_TYPE,
                body: self.metrics(),
            },
            "/" => Reply {
                status: 200,
                content_type: "text/html; charset=utf-8",
                body: self.index(),
            },
            _ => Reply {
                status: 404,
                content_type: "text/plain; charset=utf-8",
                body: "not found\n".into(),
            },
        }
    }

    fn metrics(&self) -> String {
        let snapshot = self.registry.snapshot();
        debug!("Scrape: {} leituras", snapshot.len());
        let mut body = render_temperatures(&snapshot, &self.names, &self.exposition);
        if self.exposition.link_stats {
            body.push_str(&render_link_totals(&self.counters.totals()));
        }
        body
    }

    fn index(&self) -> String {
        format!(
            "<html><body><h1>EnOcean Temperature exporter</h1><ul><li>port {}</li><li><a href=\"/metrics\">metrics</a></li></ul></body></html>",
            escape_html(&self.port)
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Servidor bloqueante; atende uma requisição por vez.
pub struct MetricsServer {
    server: Server,
    state: ScrapeState,
}

impl MetricsServer {
    pub fn bind(
        listen: &str,
        state: ScrapeState,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let server = Server::http(listen)?;
        info!("Métricas disponíveis em http://{listen}/metrics");
        Ok(Self { server, state })
    }

    /// Atende requisições até o servidor ser encerrado.
    pub fn serve(self) {
        for request in self.server.incoming_requests() {
            let reply = self.state.route(request.method(), request.url());
            let mut response = Response::from_string(reply.body).with_status_code(reply.status);
            if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
                response = response.with_header(header);
            }
            if let Err(e) = request.respond(response) {
                warn!("Erro ao responder scrape: {e}");
            }
        }
    }
}
