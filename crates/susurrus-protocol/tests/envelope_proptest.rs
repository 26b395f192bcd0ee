use proptest::prelude::*;
use susurrus_protocol::{BloomFilter, Envelope, Topic};

fn arb_topic() -> impl Strategy<Value = Topic> {
    any::<[u8; 4]>().prop_map(Topic)
}

proptest! {
    /// Any envelope survives a wire roundtrip unchanged.
    #[test]
    fn roundtrip_envelope(
        expiry in any::<u64>(),
        ttl in any::<u64>(),
        topic in arb_topic(),
        data in prop::collection::vec(any::<u8>(), 0..4096),
        nonce in any::<u64>(),
    ) {
        let env = Envelope::new(expiry, ttl, topic, data, nonce);
        let bytes = env.to_bytes().expect("serialize");
        let decoded = Envelope::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(&env, &decoded);
    }

    /// The identifier is a pure function of the field tuple.
    #[test]
    fn id_deterministic(
        expiry in any::<u64>(),
        ttl in any::<u64>(),
        topic in arb_topic(),
        data in prop::collection::vec(any::<u8>(), 0..2048),
        nonce in any::<u64>(),
    ) {
        let a = Envelope::new(expiry, ttl, topic, data.clone(), nonce);
        let b = Envelope::new(expiry, ttl, topic, data, nonce);
        prop_assert_eq!(a.id(), b.id());
        prop_assert_eq!(a.bloom(), b.bloom());

        // And it survives the wire.
        let decoded = Envelope::from_bytes(&a.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(a.id(), decoded.id());
    }

    /// A topic's own filter always matches itself.
    #[test]
    fn bloom_self_match(topic in arb_topic()) {
        let filter = BloomFilter::from_topic(&topic);
        prop_assert!(filter.contains(&filter));
        prop_assert!(!filter.is_empty());
    }

    /// A union contains each of its parts.
    #[test]
    fn bloom_union_law(a in arb_topic(), b in arb_topic(), c in arb_topic()) {
        let fa = BloomFilter::from_topic(&a);
        let fb = BloomFilter::from_topic(&b);
        let fc = BloomFilter::from_topic(&c);

        let merged = fa.union(&fb).union(&fc);
        prop_assert!(merged.contains(&fa));
        prop_assert!(merged.contains(&fb));
        prop_assert!(merged.contains(&fc));
        prop_assert!(BloomFilter::all().contains(&merged));
    }

    /// Union is commutative and idempotent.
    #[test]
    fn bloom_union_algebra(a in arb_topic(), b in arb_topic()) {
        let fa = BloomFilter::from_topic(&a);
        let fb = BloomFilter::from_topic(&b);
        prop_assert_eq!(fa.union(&fb), fb.union(&fa));
        prop_assert_eq!(fa.union(&fa), fa);
    }
}
