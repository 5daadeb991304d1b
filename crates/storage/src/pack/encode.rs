//! The packfile encoder.
//!
//! Emits a version-2 pack with one undeltified entry per object, in the
//! order given (callers hand objects over in reachability order), closed by
//! the SHA-1 trailer.

use std::io::Write;

use sha1::{Digest, Sha1};

use crate::object::Object;

/// Encode `objects` into a complete packfile.
pub fn encode(objects: &[Object]) -> Vec<u8> {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(objects.len() as u32).to_be_bytes());

    for object in objects {
        entry_header(&mut pack, object.kind.pack_code(), object.size());
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&object.data).expect("write to vec");
        pack.extend_from_slice(&encoder.finish().expect("finish to vec"));
    }

    let mut hasher = Sha1::new();
    hasher.update(&pack);
    let digest: [u8; 20] = hasher.finalize().into();
    pack.extend_from_slice(&digest);
    pack
}

fn entry_header(pack: &mut Vec<u8>, code: u8, mut size: u64) {
    let mut byte = (code << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size != 0 {
        pack.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    pack.push(byte);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn empty_pack_is_just_header_and_trailer() {
        let pack = encode(&[]);
        assert_eq!(pack.len(), 12 + 20);
        assert_eq!(&pack[..4], b"PACK");
    }

    #[test]
    fn large_sizes_use_continuation_bytes() {
        let big = Object::new(ObjectType::Blob, vec![b'a'; 70_000]);
        let pack = encode(&[big.clone()]);
        let mut reader = crate::pack::PackReader::new(&pack);
        reader.next_event().unwrap();
        let event = reader.next_event().unwrap().unwrap();
        assert_eq!(event, crate::pack::PackEvent::Object(big));
    }
}
