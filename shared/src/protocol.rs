//! Datagram protocol spoken between store clients and the store server.

use crate::error::StoreError;
use crate::model::{
    ChangeEvent, EntityId, Food, FoodId, NewFood, NewSnake, SnakePatch, SnakeQuery, SnakeRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Row payload budget of one reply part. Parts this size stay cheap for the
/// receiving socket buffer even when a large table arrives in one burst.
pub const REPLY_CHUNK_BYTES: usize = 15_000;

/// Room kept for the packet header around a single row that is larger than
/// `REPLY_CHUNK_BYTES` and travels in a part of its own.
const REPLY_HEADER_BYTES: usize = 256;

/// Most food rows a client sends in one insert request.
pub const MAX_INSERT_BATCH: usize = 256;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    /// Start receiving `Change` packets.
    Subscribe,
    Unsubscribe,
    /// Keeps the sender registered while it has nothing else to say.
    Heartbeat,
    Request {
        request_id: u32,
        op: StoreOp,
    },

    /// One part of the answer to a request. Row lists too large for one
    /// datagram are split over `parts` packets sharing the `request_id`.
    Reply {
        request_id: u32,
        part: u16,
        parts: u16,
        outcome: Result<StoreReply, StoreError>,
    },
    Change {
        event: ChangeEvent,
    },
}

/// One operation against the snakes or foods table.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum StoreOp {
    InsertSnake(NewSnake),
    UpdateSnake { id: EntityId, patch: SnakePatch },
    DeleteSnake { id: EntityId },
    QuerySnakes(SnakeQuery),
    InsertFoods(Vec<NewFood>),
    DeleteFood { id: FoodId },
    QueryFoods,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum StoreReply {
    Snake(SnakeRecord),
    Snakes(Vec<SnakeRecord>),
    Foods(Vec<Food>),
    Done,
}

impl Packet {
    /// A reply that fits in a single packet.
    pub fn reply(request_id: u32, outcome: Result<StoreReply, StoreError>) -> Self {
        Packet::Reply {
            request_id,
            part: 0,
            parts: 1,
            outcome,
        }
    }
}

impl StoreReply {
    pub fn into_snake(self) -> Result<SnakeRecord, StoreError> {
        match self {
            StoreReply::Snake(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_snakes(self) -> Result<Vec<SnakeRecord>, StoreError> {
        match self {
            StoreReply::Snakes(records) => Ok(records),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_foods(self) -> Result<Vec<Food>, StoreError> {
        match self {
            StoreReply::Foods(foods) => Ok(foods),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_done(self) -> Result<(), StoreError> {
        match self {
            StoreReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(reply: &StoreReply) -> StoreError {
    let name = match reply {
        StoreReply::Snake(_) => "Snake",
        StoreReply::Snakes(_) => "Snakes",
        StoreReply::Foods(_) => "Foods",
        StoreReply::Done => "Done",
    };
    StoreError::Codec(format!("unexpected reply {}", name))
}

/// Splits the answer to `request_id` into reply packets that each fit a
/// datagram. Row lists are cut at `REPLY_CHUNK_BYTES`; everything else and
/// every error travels as a single part.
pub fn split_reply(request_id: u32, outcome: Result<StoreReply, StoreError>) -> Vec<Packet> {
    let parts = match outcome {
        Ok(StoreReply::Snakes(rows)) => {
            chunk_rows(rows).map(|chunks| chunks.into_iter().map(StoreReply::Snakes).collect())
        }
        Ok(StoreReply::Foods(rows)) => {
            chunk_rows(rows).map(|chunks| chunks.into_iter().map(StoreReply::Foods).collect())
        }
        Ok(reply) => Ok(vec![reply]),
        Err(e) => Err(e),
    };

    match parts {
        Ok(parts) => {
            let count = parts.len() as u16;
            parts
                .into_iter()
                .enumerate()
                .map(|(part, reply)| Packet::Reply {
                    request_id,
                    part: part as u16,
                    parts: count,
                    outcome: Ok(reply),
                })
                .collect()
        }
        Err(e) => vec![Packet::reply(request_id, Err(e))],
    }
}

fn chunk_rows<T: Serialize>(rows: Vec<T>) -> Result<Vec<Vec<T>>, StoreError> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;

    for row in rows {
        let row_bytes = bincode::serialized_size(&row)? as usize;
        if row_bytes > MAX_DATAGRAM - REPLY_HEADER_BYTES {
            return Err(StoreError::Unavailable(format!(
                "row of {} bytes does not fit a datagram",
                row_bytes
            )));
        }
        if !current.is_empty() && current_bytes + row_bytes > REPLY_CHUNK_BYTES {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += row_bytes;
        current.push(row);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }

    if chunks.len() > u16::MAX as usize {
        return Err(StoreError::Unavailable("reply has too many parts".to_string()));
    }
    Ok(chunks)
}

/// Collects multi-part replies until every part of a request has arrived.
///
/// Parts may arrive in any order. An error part completes its request at
/// once; the other parts of that request are then ignored.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    partial: HashMap<u32, Vec<Option<StoreReply>>>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reply packet. Returns the complete outcome once the last
    /// missing part of `request_id` arrives.
    pub fn accept(
        &mut self,
        request_id: u32,
        part: u16,
        parts: u16,
        outcome: Result<StoreReply, StoreError>,
    ) -> Option<Result<StoreReply, StoreError>> {
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                self.partial.remove(&request_id);
                return Some(Err(e));
            }
        };
        if parts <= 1 {
            self.partial.remove(&request_id);
            return Some(Ok(reply));
        }

        let slots = self
            .partial
            .entry(request_id)
            .or_insert_with(|| vec![None; parts as usize]);
        if slots.len() != parts as usize || part >= parts {
            self.partial.remove(&request_id);
            return Some(Err(StoreError::Codec(format!(
                "part {} of {} does not match request {}",
                part, parts, request_id
            ))));
        }

        slots[part as usize] = Some(reply);
        if slots.iter().any(Option::is_none) {
            return None;
        }

        let slots = self.partial.remove(&request_id)?;
        Some(merge_parts(slots.into_iter().flatten()))
    }

    /// Drops partial replies whose request is no longer waited for.
    pub fn retain(&mut self, mut waiting: impl FnMut(u32) -> bool) {
        self.partial.retain(|request_id, _| waiting(*request_id));
    }

    /// Number of requests with some but not all parts received.
    pub fn in_progress(&self) -> usize {
        self.partial.len()
    }
}

fn merge_parts(parts: impl Iterator<Item = StoreReply>) -> Result<StoreReply, StoreError> {
    let mut merged: Option<StoreReply> = None;
    for part in parts {
        merged = Some(match (merged, part) {
            (None, part) => part,
            (Some(StoreReply::Snakes(mut rows)), StoreReply::Snakes(more)) => {
                rows.extend(more);
                StoreReply::Snakes(rows)
            }
            (Some(StoreReply::Foods(mut rows)), StoreReply::Foods(more)) => {
                rows.extend(more);
                StoreReply::Foods(rows)
            }
            (Some(_), other) => return Err(unexpected(&other)),
        });
    }
    merged.ok_or_else(|| StoreError::Codec("reply without parts".to_string()))
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(packet)?)
}

pub fn decode(data: &[u8]) -> Result<Packet, StoreError> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2;

    #[test]
    fn test_packet_serialization_request() {
        let packet = Packet::Request {
            request_id: 9,
            op: StoreOp::DeleteFood { id: 77 },
        };
        let bytes = encode(&packet).unwrap();

        match decode(&bytes).unwrap() {
            Packet::Request {
                request_id,
                op: StoreOp::DeleteFood { id },
            } => {
                assert_eq!(request_id, 9);
                assert_eq!(id, 77);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_error_reply() {
        let packet = Packet::reply(3, Err(StoreError::NotFound(12)));
        let bytes = encode(&packet).unwrap();

        match decode(&bytes).unwrap() {
            Packet::Reply {
                request_id,
                outcome,
                ..
            } => {
                assert_eq!(request_id, 3);
                assert_eq!(outcome.unwrap_err(), StoreError::NotFound(12));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_change() {
        let food = Food {
            id: 5,
            position: Vec2::new(10.0, 20.0),
            color: "hsl(120, 100%, 50%)".to_string(),
            value: 1.0,
        };
        let packet = Packet::Change {
            event: ChangeEvent::food_inserted(food.clone()),
        };
        let bytes = encode(&packet).unwrap();

        match decode(&bytes).unwrap() {
            Packet::Change {
                event: ChangeEvent::Food { new, .. },
            } => assert_eq!(new, Some(food)),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_reply_conversions() {
        assert!(StoreReply::Done.into_done().is_ok());
        assert!(StoreReply::Foods(vec![]).into_foods().unwrap().is_empty());

        let err = StoreReply::Done.into_snake().unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_malformed_datagram_rejected() {
        let bytes = encode(&Packet::Heartbeat).unwrap();
        let mut corrupted = bytes.clone();
        corrupted[0] = 0xFF;
        assert!(decode(&corrupted).is_err());
        assert!(decode(&[]).is_err());
    }

    fn foods(count: u64) -> Vec<Food> {
        (0..count)
            .map(|id| Food {
                id,
                position: Vec2::new(id as f32, 5.0),
                color: "hsl(240, 100%, 50%)".to_string(),
                value: 1.0,
            })
            .collect()
    }

    fn reply_parts(packets: Vec<Packet>) -> Vec<(u32, u16, u16, Result<StoreReply, StoreError>)> {
        packets
            .into_iter()
            .map(|packet| match packet {
                Packet::Reply {
                    request_id,
                    part,
                    parts,
                    outcome,
                } => (request_id, part, parts, outcome),
                other => panic!("Expected a reply, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_small_reply_is_one_part() {
        let packets = split_reply(1, Ok(StoreReply::Foods(foods(3))));
        assert_eq!(packets.len(), 1);

        let packets = split_reply(2, Err(StoreError::NotFound(4)));
        let parts = reply_parts(packets);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].2, 1);
    }

    #[test]
    fn test_large_food_table_splits_into_datagrams() {
        let table = foods(5000);
        let packets = split_reply(9, Ok(StoreReply::Foods(table.clone())));
        assert!(packets.len() > 1);
        for packet in &packets {
            assert!(encode(packet).unwrap().len() <= MAX_DATAGRAM);
        }

        // Deliver the parts back to front
        let mut assembler = ReplyAssembler::new();
        let mut parts = reply_parts(packets);
        parts.reverse();
        let last = parts.len() - 1;
        let mut complete = None;
        for (i, (request_id, part, count, outcome)) in parts.into_iter().enumerate() {
            let result = assembler.accept(request_id, part, count, outcome);
            if i < last {
                assert!(result.is_none());
            } else {
                complete = result;
            }
        }

        let merged = complete.unwrap().unwrap().into_foods().unwrap();
        assert_eq!(merged, table);
        assert_eq!(assembler.in_progress(), 0);
    }

    #[test]
    fn test_error_part_completes_request() {
        let mut assembler = ReplyAssembler::new();
        assert!(assembler
            .accept(5, 0, 3, Ok(StoreReply::Foods(foods(2))))
            .is_none());
        let outcome = assembler.accept(5, 1, 3, Err(StoreError::TimedOut));
        assert_eq!(outcome, Some(Err(StoreError::TimedOut)));
        assert_eq!(assembler.in_progress(), 0);
    }

    #[test]
    fn test_mismatched_part_counts_rejected() {
        let mut assembler = ReplyAssembler::new();
        assert!(assembler
            .accept(6, 0, 2, Ok(StoreReply::Foods(foods(1))))
            .is_none());
        let outcome = assembler.accept(6, 1, 3, Ok(StoreReply::Foods(foods(1))));
        assert!(matches!(outcome, Some(Err(StoreError::Codec(_)))));
    }

    #[test]
    fn test_retain_drops_abandoned_requests() {
        let mut assembler = ReplyAssembler::new();
        assembler.accept(1, 0, 2, Ok(StoreReply::Foods(foods(1))));
        assembler.accept(2, 0, 2, Ok(StoreReply::Foods(foods(1))));
        assembler.retain(|request_id| request_id == 2);
        assert_eq!(assembler.in_progress(), 1);
    }
}
