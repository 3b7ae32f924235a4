//! Smoke test for a running store server: inserts a snake and some food,
//! reads them back, then cleans up.

use rand::Rng;
use shared::protocol::{decode, encode, MAX_DATAGRAM};
use shared::{
    now_millis, NewFood, NewSnake, Packet, ReplyAssembler, SnakeQuery, StoreOp, StoreReply, Vec2,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn request(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    request_id: u32,
    op: StoreOp,
) -> Result<StoreReply, Box<dyn std::error::Error>> {
    socket
        .send_to(&encode(&Packet::Request { request_id, op })?, server_addr)
        .await?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut assembler = ReplyAssembler::new();
    loop {
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
        match decode(&buf[..len])? {
            Packet::Reply {
                request_id: id,
                part,
                parts,
                outcome,
            } if id == request_id => {
                if let Some(outcome) = assembler.accept(id, part, parts, outcome) {
                    return Ok(outcome?);
                }
            }
            other => println!("Skipping packet: {:?}", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse::<SocketAddr>()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Smoke client bound to {}", socket.local_addr()?);

    let snake = NewSnake {
        name: "smoke".to_string(),
        score: 10.0,
        position: Vec2::new(1500.0, 1500.0),
        angle: 0.0,
        segments: (0..10)
            .map(|i| Vec2::new(1500.0 - 8.0 * i as f32, 1500.0))
            .collect(),
        alive: true,
        last_update: now_millis(),
    };
    let record = request(&socket, server_addr, 1, StoreOp::InsertSnake(snake))
        .await?
        .into_snake()?;
    println!("Inserted snake with id {}", record.id);

    let mut rng = rand::thread_rng();
    let foods = (0..5)
        .map(|_| NewFood {
            position: Vec2::new(rng.gen_range(10.0..2990.0), rng.gen_range(10.0..2990.0)),
            color: format!("hsl({}, 100%, 50%)", rng.gen_range(0..360)),
            value: 1.0,
        })
        .collect();
    let inserted = request(&socket, server_addr, 2, StoreOp::InsertFoods(foods))
        .await?
        .into_foods()?;
    println!("Inserted {} food items", inserted.len());

    let board = request(
        &socket,
        server_addr,
        3,
        StoreOp::QuerySnakes(SnakeQuery::leaderboard(10)),
    )
    .await?
    .into_snakes()?;
    println!("Leaderboard:");
    for (rank, row) in board.iter().enumerate() {
        println!("  {}. {} ({:.1})", rank + 1, row.name, row.score);
    }

    let total = request(&socket, server_addr, 4, StoreOp::QueryFoods)
        .await?
        .into_foods()?
        .len();
    println!("Food on the server: {}", total);

    request(&socket, server_addr, 5, StoreOp::DeleteSnake { id: record.id })
        .await?
        .into_done()?;
    for (offset, food) in inserted.iter().enumerate() {
        request(
            &socket,
            server_addr,
            6 + offset as u32,
            StoreOp::DeleteFood { id: food.id },
        )
        .await?
        .into_done()?;
    }
    println!("Cleaned up");

    Ok(())
}
