//! A WebSocket echo server using wsock and hyper.
//! Accepts WebSocket connections on port 8080 and echoes back any text or binary message it receives.

use http_body_util::Empty;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use tokio::net::TcpListener;
use wsock::{Event, Options};

/// Echoes messages until the client closes the connection.
async fn handle_client(fut: wsock::UpgradeFut) -> wsock::Result<()> {
    let mut ws = fut.await?;

    while let Some(event) = ws.next_event().await {
        match event? {
            Event::Text(text) => ws.send(text).await?,
            Event::Binary(data) => ws.send(data).await?,
            Event::Close { code, reason } => {
                log::debug!("Client closed the connection ({code:?}, {reason:?})");
            }
            Event::Ping(_) | Event::Pong(_) => {}
        }
    }

    log::debug!("Client disconnected");

    Ok(())
}

/// Upgrades an HTTP connection to a WebSocket one.
async fn server_upgrade(mut req: Request<Incoming>) -> wsock::Result<Response<Empty<Bytes>>> {
    let (response, fut) = wsock::accept_with_options(
        &mut req,
        Options::default()
            .with_max_payload_read(16 * 1024 * 1024)
            .with_max_read_buffer(32 * 1024 * 1024),
    )?;

    tokio::task::spawn(async move {
        if let Err(e) = handle_client(fut).await {
            log::error!("Error in websocket connection: {}", e);
        }
    });

    Ok(response)
}

#[tokio::main]
async fn main() -> wsock::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let listener = TcpListener::bind("0.0.0.0:8080").await?;

    log::debug!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        log::info!("Client connected");

        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let conn_fut = http1::Builder::new()
                .serve_connection(io, service_fn(server_upgrade))
                .with_upgrades();
            if let Err(e) = conn_fut.await {
                log::error!("An error occurred: {:?}", e);
            }
        });
    }
}
