//! Property tests for frame encoding and decoding.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use sftpwire::codec::{RawCodec, RawPacket};
use sftpwire::protocol::{packet_type, FrameDecoder, FrameEncoder, FramePart};

fn data_packet(id: u32, body_len: usize) -> RawPacket {
    let mut header = id.to_be_bytes().to_vec();
    header.extend_from_slice(&(body_len as u32).to_be_bytes());
    RawPacket::new(packet_type::DATA, header)
}

fn encode(packets: &[(RawPacket, Vec<u8>)]) -> BytesMut {
    let encoder = FrameEncoder::new(Arc::new(RawCodec::sftp_v3()));
    let mut wire = BytesMut::new();
    for (packet, body) in packets {
        encoder
            .encode(FramePart::header(packet.clone(), body.len() as u32), &mut wire)
            .unwrap();
        encoder
            .encode(FramePart::BodyChunk(Bytes::copy_from_slice(body)), &mut wire)
            .unwrap();
        encoder.encode(FramePart::BodyEnd, &mut wire).unwrap();
    }
    wire
}

/// Decode `wire` fed in pieces of `split` bytes; bodies are reassembled.
fn decode(wire: &[u8], split: usize) -> Vec<(RawPacket, Vec<u8>)> {
    let mut decoder = FrameDecoder::new(Arc::new(RawCodec::sftp_v3()));
    let mut decoded: Vec<(RawPacket, Vec<u8>)> = Vec::new();
    let mut ended = 0;

    for piece in wire.chunks(split) {
        for part in decoder.push(piece).unwrap() {
            match part {
                FramePart::Header { packet, .. } => decoded.push((packet, Vec::new())),
                FramePart::BodyChunk(chunk) => {
                    decoded.last_mut().unwrap().1.extend_from_slice(&chunk)
                }
                FramePart::BodyEnd => ended += 1,
            }
        }
    }
    assert_eq!(ended, decoded.len(), "every frame ends");
    assert!(decoder.is_idle());
    decoded
}

#[test]
fn test_status_example() {
    let encoder = FrameEncoder::new(Arc::new(RawCodec::sftp_v3()));
    let bytes = encoder
        .encode_to_bytes(FramePart::header(
            RawPacket::new(packet_type::STATUS, vec![0, 0, 0, 1]),
            0,
        ))
        .unwrap();
    assert_eq!(&bytes[..], &[0, 0, 0, 5, 101, 0, 0, 0, 1]);

    let mut decoder = FrameDecoder::new(Arc::new(RawCodec::sftp_v3()));
    let parts = decoder.push(&bytes).unwrap();
    // Packets without a body type carry no end marker.
    assert_eq!(
        parts,
        vec![FramePart::header(
            RawPacket::new(packet_type::STATUS, vec![0, 0, 0, 1]),
            0
        )]
    );
    assert!(decoder.is_idle());
}

#[test]
fn test_body_never_coalesced_across_frames() {
    let packets = vec![
        (data_packet(1, 3), b"abc".to_vec()),
        (data_packet(2, 2), b"de".to_vec()),
    ];
    let wire = encode(&packets);

    let mut decoder = FrameDecoder::new(Arc::new(RawCodec::sftp_v3()));
    let parts = decoder.push(&wire).unwrap();
    let chunks: Vec<_> = parts
        .iter()
        .filter_map(|part| match part {
            FramePart::BodyChunk(chunk) => Some(chunk.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]);
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_decoding(
        bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..2048), 1..5),
        split in 1usize..300,
    ) {
        let packets: Vec<_> = bodies
            .into_iter()
            .enumerate()
            .map(|(id, body)| (data_packet(id as u32, body.len()), body))
            .collect();
        let wire = encode(&packets);

        prop_assert_eq!(decode(&wire, split), packets.clone());
        prop_assert_eq!(decode(&wire, wire.len()), packets);
    }

    #[test]
    fn prop_frame_length_covers_header_and_body(
        id in any::<u32>(),
        body_len in 0usize..100_000,
    ) {
        let encoder = FrameEncoder::new(Arc::new(RawCodec::sftp_v3()));
        let header = encoder
            .encode_to_bytes(FramePart::header(data_packet(id, body_len), body_len as u32))
            .unwrap();
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        prop_assert_eq!(length as usize, 1 + 8 + body_len);
        prop_assert_eq!(header.len(), 4 + 1 + 8);
    }
}
