use super::*;
use std::str::FromStr;

#[test]
fn test_base36_roundtrip() {
    assert_eq!("00000000", base36(0));
    assert_eq!("00000001", base36(1));
    assert_eq!("0000000z", base36(35));
    assert_eq!("00000010", base36(36));
}

#[test]
fn test_chunk_tags_are_unique() {
    let src = SocketAddr::from_str("127.0.0.1:1234").unwrap();
    let dst = SocketAddr::from_str("127.0.0.1:5678").unwrap();

    let a = ChunkUdp::new(src, dst, vec![]);
    let b = ChunkUdp::new(src, dst, vec![]);
    assert_ne!(a.tag(), b.tag(), "tags should be unique");
}

#[test]
fn test_chunk_udp_fields() {
    let src = SocketAddr::from_str("127.0.0.1:1234").unwrap();
    let dst = SocketAddr::from_str("10.0.0.2:5678").unwrap();
    let c = ChunkUdp::new(src, dst, b"hello".to_vec());

    assert_eq!(c.network(), "udp");
    assert_eq!(c.source_addr(), src);
    assert_eq!(c.destination_addr(), dst);
    assert_eq!(c.user_data(), b"hello".to_vec());

    let cloned = c.clone_to();
    assert_eq!(cloned.tag(), c.tag());
    assert_eq!(cloned.source_addr(), c.source_addr());
}

#[test]
fn test_chunk_set_addr() {
    let src = SocketAddr::from_str("127.0.0.1:1234").unwrap();
    let dst = SocketAddr::from_str("127.0.0.1:5678").unwrap();
    let mut c = ChunkUdp::new(src, dst, vec![]);

    c.set_source_addr("1.2.3.4:9").unwrap();
    assert_eq!(c.source_addr(), SocketAddr::from_str("1.2.3.4:9").unwrap());

    assert!(c.set_source_addr("not-an-addr").is_err());
}
