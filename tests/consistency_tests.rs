//! Randomized comparison of RfcClassifier against the linear reference

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use rfc_classifier::{
    Classifier, ClassifierOptions, FieldLocation, FieldRef, Filter, LinearClassifier,
    PacketMeta, RfcClassifier, Rule, RuleId,
};

const PROTO: FieldLocation = FieldLocation {
    layer: FieldRef::NETWORK,
    offset: 9,
};
const SRC_ADDR: FieldLocation = FieldLocation {
    layer: FieldRef::NETWORK,
    offset: 12,
};
const DST_ADDR: FieldLocation = FieldLocation {
    layer: FieldRef::NETWORK,
    offset: 16,
};
const SRC_PORT: FieldLocation = FieldLocation {
    layer: FieldRef::TRANSPORT,
    offset: 0,
};
const DST_PORT: FieldLocation = FieldLocation {
    layer: FieldRef::TRANSPORT,
    offset: 2,
};

const PROTOS: [u8; 4] = [1, 6, 17, 47];
const ADDRS: [[u8; 4]; 6] = [
    [10, 0, 0, 1],
    [10, 0, 0, 2],
    [10, 0, 1, 7],
    [10, 1, 0, 1],
    [192, 168, 1, 1],
    [192, 168, 1, 200],
];
const PORTS: [u16; 8] = [0, 22, 53, 80, 443, 1024, 8080, 65535];
const PREFIXES: [u8; 6] = [0, 8, 16, 20, 24, 32];

/// Never handed out by `random_rules`
const LAYOUT_UID: RuleId = 63;

fn options() -> ClassifierOptions {
    ClassifierOptions::new()
        .with_max_rules(64)
        .with_max_fan_in(2)
        .with_max_chunk_cells(1 << 24)
}

fn pick<T: Copy>(rng: &mut StdRng, values: &[T]) -> T {
    values[rng.gen_range(0..values.len())]
}

fn random_proto(rng: &mut StdRng) -> u8 {
    if rng.gen_bool(0.8) {
        pick(rng, &PROTOS)
    } else {
        rng.gen()
    }
}

fn random_addr(rng: &mut StdRng) -> [u8; 4] {
    if rng.gen_bool(0.8) {
        pick(rng, &ADDRS)
    } else {
        rng.gen()
    }
}

fn random_port(rng: &mut StdRng) -> u16 {
    if rng.gen_bool(0.7) {
        pick(rng, &PORTS)
    } else {
        rng.gen()
    }
}

fn reverse_of(location: FieldLocation) -> FieldLocation {
    match location {
        SRC_ADDR => DST_ADDR,
        DST_ADDR => SRC_ADDR,
        SRC_PORT => DST_PORT,
        DST_PORT => SRC_PORT,
        other => other,
    }
}

fn random_filter(rng: &mut StdRng) -> Filter {
    match rng.gen_range(0..5) {
        0 => match rng.gen_range(0..3) {
            0 => Filter::u8(PROTO, random_proto(rng)),
            1 => Filter::set(PROTO, vec![vec![random_proto(rng)], vec![random_proto(rng)]]),
            _ => Filter::wildcard(PROTO, 1),
        },
        field @ (1 | 2) => {
            let location = if field == 1 { SRC_ADDR } else { DST_ADDR };
            let addr = random_addr(rng);
            match rng.gen_range(0..3) {
                0 => Filter::exact(location, addr),
                1 => {
                    // Same upper half, arbitrary lower half
                    let (a, b) = (random_addr(rng), random_addr(rng));
                    let (lo, hi) = if a[2..] <= b[2..] { (a, b) } else { (b, a) };
                    let min = [addr[0], addr[1], lo[2], lo[3]];
                    let max = [addr[0], addr[1], hi[2], hi[3]];
                    Filter::range(location, min, max)
                }
                _ => {
                    let prefix = pick(rng, &PREFIXES);
                    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                    Filter::masked(location, addr, mask.to_be_bytes())
                }
            }
        }
        field => {
            let location = if field == 3 { SRC_PORT } else { DST_PORT };
            match rng.gen_range(0..5) {
                0 => Filter::u16(location, random_port(rng)),
                1 | 2 => {
                    let (a, b) = (random_port(rng), random_port(rng));
                    Filter::range_u16(location, a.min(b), a.max(b))
                }
                // Port parity: a mask that is not a prefix
                3 => Filter::masked(location, [0, rng.gen_range(0u8..2)], [0, 1]),
                _ => Filter::wildcard(location, 2),
            }
        }
    }
}

fn random_rule(rng: &mut StdRng, uid: RuleId) -> Rule {
    let mut rule = Rule::new(uid);
    let bidirectional = rng.gen_bool(0.3);
    for _ in 0..rng.gen_range(1..=3) {
        let filter = random_filter(rng);
        let filter = if bidirectional && rng.gen_bool(0.7) {
            let reverse = reverse_of(filter.location);
            filter.with_reverse(reverse)
        } else {
            filter
        };
        rule = rule.with_filter(filter);
    }
    if bidirectional {
        rule = rule.bidirectional();
    }
    rule
}

fn random_rules(rng: &mut StdRng, count: usize) -> Vec<Rule> {
    let mut uids: Vec<RuleId> = (0..LAYOUT_UID).collect();
    uids.shuffle(rng);
    uids[..count]
        .iter()
        .map(|&uid| random_rule(rng, uid))
        .collect()
}

fn only_addresses(rule: &Rule) -> bool {
    rule.filters
        .iter()
        .all(|f| f.location.layer == FieldRef::NETWORK && f.location != PROTO)
}

fn random_packet(rng: &mut StdRng) -> Vec<u8> {
    let mut payload = vec![0u8; 24];
    payload[9] = random_proto(rng);
    payload[12..16].copy_from_slice(&random_addr(rng));
    payload[16..20].copy_from_slice(&random_addr(rng));
    payload[20..22].copy_from_slice(&random_port(rng).to_be_bytes());
    payload[22..24].copy_from_slice(&random_port(rng).to_be_bytes());
    payload
}

fn assert_agree(rfc: &RfcClassifier, linear: &LinearClassifier, rng: &mut StdRng, step: &str) {
    assert_eq!(rfc.rule_count(), linear.rule_count(), "{}", step);
    for _ in 0..200 {
        let payload = random_packet(rng);
        let packet = PacketMeta::new(&payload)
            .with_layer(FieldRef::NETWORK, 0)
            .with_layer(FieldRef::TRANSPORT, 20);
        assert_eq!(
            rfc.classify(&packet),
            linear.classify(&packet),
            "{}: packet {:?}",
            step,
            payload
        );
    }
}

fn classifiers() -> (RfcClassifier, LinearClassifier) {
    (
        RfcClassifier::new(options()).unwrap(),
        LinearClassifier::new(options()).unwrap(),
    )
}

#[test]
fn test_bulk_build_matches_linear() {
    for seed in 0..4 {
        let mut rng = StdRng::seed_from_u64(seed);
        let rules = random_rules(&mut rng, 20);
        let (rfc, linear) = classifiers();
        rfc.add_rules(&rules).unwrap();
        linear.add_rules(&rules).unwrap();
        assert_agree(&rfc, &linear, &mut rng, &format!("seed {} bulk", seed));
    }
}

#[test]
fn test_incremental_adds_match_linear() {
    for seed in 10..13 {
        let mut rng = StdRng::seed_from_u64(seed);
        let rules = random_rules(&mut rng, 16);
        let (rfc, linear) = classifiers();

        // Start with the address chunks only, so later rules create the
        // protocol and port chunks incrementally
        let mut initial = vec![Rule::new(LAYOUT_UID)
            .with_filter(Filter::wildcard(SRC_ADDR, 4))
            .with_filter(Filter::wildcard(DST_ADDR, 4))];
        initial.extend(rules[..2].iter().filter(|r| only_addresses(r)).cloned());
        rfc.add_rules(&initial).unwrap();
        linear.add_rules(&initial).unwrap();
        let rules: Vec<&Rule> = rules.iter().filter(|r| !initial.contains(r)).collect();
        for (n, rule) in rules.into_iter().enumerate() {
            rfc.add_rules(std::slice::from_ref(rule)).unwrap();
            linear.add_rules(std::slice::from_ref(rule)).unwrap();
            assert_agree(&rfc, &linear, &mut rng, &format!("seed {} add {}", seed, n));
        }
    }
}

#[test]
fn test_deletes_match_linear() {
    for seed in 20..23 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rules = random_rules(&mut rng, 16);
        let (rfc, linear) = classifiers();
        rfc.add_rules(&rules).unwrap();
        linear.add_rules(&rules).unwrap();

        rules.shuffle(&mut rng);
        let (deleted, kept) = rules.split_at(10);
        for (n, rule) in deleted.iter().enumerate() {
            rfc.del_rules(std::slice::from_ref(rule)).unwrap();
            linear.del_rules(std::slice::from_ref(rule)).unwrap();
            assert_agree(&rfc, &linear, &mut rng, &format!("seed {} delete {}", seed, n));
        }
        assert_eq!(rfc.rule_count(), kept.len());

        // Deleted ids can be reused with new filters
        let reused: Vec<Rule> = deleted[..4]
            .iter()
            .map(|rule| random_rule(&mut rng, rule.uid))
            .collect();
        rfc.add_rules(&reused).unwrap();
        linear.add_rules(&reused).unwrap();
        assert_agree(&rfc, &linear, &mut rng, &format!("seed {} re-add", seed));
    }
}

#[test]
fn test_deletes_without_remap_match_linear() {
    let mut rng = StdRng::seed_from_u64(99);
    let rules = random_rules(&mut rng, 12);
    let rfc = RfcClassifier::new(options().with_remap_after_delete(false)).unwrap();
    let linear = LinearClassifier::new(options()).unwrap();
    rfc.add_rules(&rules).unwrap();
    linear.add_rules(&rules).unwrap();

    for rule in &rules[..8] {
        rfc.del_rules(std::slice::from_ref(rule)).unwrap();
        linear.del_rules(std::slice::from_ref(rule)).unwrap();
    }
    assert_agree(&rfc, &linear, &mut rng, "no remap");

    let extra = random_rule(&mut rng, rules[0].uid);
    rfc.add_rules(std::slice::from_ref(&extra)).unwrap();
    linear.add_rules(std::slice::from_ref(&extra)).unwrap();
    assert_agree(&rfc, &linear, &mut rng, "no remap re-add");
}

#[test]
fn test_delete_everything_then_rebuild() {
    let mut rng = StdRng::seed_from_u64(7);
    let rules = random_rules(&mut rng, 8);
    let (rfc, linear) = classifiers();
    rfc.add_rules(&rules).unwrap();
    linear.add_rules(&rules).unwrap();

    rfc.del_rules(&rules).unwrap();
    linear.del_rules(&rules).unwrap();
    assert_agree(&rfc, &linear, &mut rng, "empty");

    rfc.add_rules(&rules[..5]).unwrap();
    linear.add_rules(&rules[..5]).unwrap();
    assert_agree(&rfc, &linear, &mut rng, "rebuilt");
}
