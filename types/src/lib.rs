//! Wire messages exchanged between Strassen workers.
//!
//! Every value that crosses a rank boundary is one of the messages below,
//! encoded with prost. Matrices travel as row-major `sint32` sequences.

pub mod wire {
    /// Side length of the matrices about to be broadcast.
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Dimension {
        #[prost(uint64, tag = "1")]
        pub side: u64,
    }

    /// Announces a chunked broadcast of `total_len` elements.
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct ChunkHeader {
        #[prost(uint64, tag = "1")]
        pub total_len: u64,
        #[prost(uint64, tag = "2")]
        pub chunk_count: u64,
    }

    /// One slice of a broadcast buffer starting at `offset`.
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Chunk {
        #[prost(uint64, tag = "1")]
        pub offset: u64,
        #[prost(sint32, repeated, tag = "2")]
        pub values: Vec<i32>,
    }

    /// A flattened sub-product sent from its owning rank back to the coordinator.
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct SubProductResult {
        /// 1-based Strassen product index (M1..M7).
        #[prost(uint32, tag = "1")]
        pub index: u32,
        #[prost(uint64, tag = "2")]
        pub side: u64,
        #[prost(sint32, repeated, tag = "3")]
        pub values: Vec<i32>,
    }
}

/// Message tags understood by both ends of a channel.
pub mod tags {
    pub const DIMENSION: i32 = 1;
    pub const CHUNK_HEADER: i32 = 2;
    pub const CHUNK: i32 = 3;
    pub const SUB_PRODUCT: i32 = 10;
}

#[cfg(test)]
mod tests {
    use super::wire::*;
    use prost::Message;

    #[test]
    fn sub_product_survives_encoding() {
        let msg = SubProductResult {
            index: 4,
            side: 2,
            values: vec![i32::MIN, -1, 0, i32::MAX],
        };
        let bytes = msg.encode_to_vec();
        let decoded = SubProductResult::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_chunk_decodes_to_default() {
        let decoded = Chunk::decode(&[][..]).unwrap();
        assert_eq!(decoded.offset, 0);
        assert!(decoded.values.is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = Chunk {
            offset: 7,
            values: vec![1, 2, 3],
        }
        .encode_to_vec();
        assert!(Chunk::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
