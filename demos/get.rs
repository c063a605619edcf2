//! Sends two GET requests over one connection and prints both bodies.
//!
//! cargo run --example get -- 127.0.0.1:8080 /path

use async_dup::Arc;
use persistconn::{client::ClientConn, Body, Request};
use smol::Async;
use std::net::{SocketAddr, TcpStream};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9999".to_owned()).parse()?;
    let path = args.next().unwrap_or_else(|| "/".to_owned());

    smol::block_on(async {
        let stream = Arc::new(Async::<TcpStream>::connect(addr).await?);
        let (conn, read_loop) = ClientConn::from_io(stream);
        smol::spawn(read_loop.run()).detach();

        for _ in 0..2 {
            let mut req = Request::new(Body::empty());
            *req.uri_mut() = format!("http://{}{}", addr, path).parse()?;

            let resp = conn.send(req).await?;
            println!("{:?} {}", resp.version(), resp.status());
            for (name, value) in resp.headers() {
                println!("{}: {:?}", name, value);
            }
            println!();
            println!("{}", resp.into_body().into_string().await?);
        }

        conn.close().await?;
        Ok(())
    })
}
