use germcall::indel::ReadPathScores;
use germcall::{AlleleKey, CallerConfig, IndelCandidateBuffer, OrthogonalAlleleSelector, RegionPloidy};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct AlleleEvidence {
    key: AlleleKey,
    supporting: u32,
    opposing: u32,
}

fn allele_strategy() -> impl Strategy<Value = AlleleEvidence> {
    let key = prop_oneof![
        (0u32..40, 1u32..6).prop_map(|(pos, len)| AlleleKey::deletion(pos, len)),
        (0u32..40, 1usize..4).prop_map(|(pos, len)| AlleleKey::insertion(pos, vec![b'T'; len])),
    ];
    (key, 0u32..8, 0u32..4).prop_map(|(key, supporting, opposing)| AlleleEvidence {
        key,
        supporting,
        opposing,
    })
}

fn fill_buffer<'a>(alleles: impl Iterator<Item = (usize, &'a AlleleEvidence)>) -> IndelCandidateBuffer {
    let mut buffer = IndelCandidateBuffer::new(&CallerConfig::default());
    for (i, allele) in alleles {
        let first_read = i as u32 * 100;
        for r in 0..allele.supporting + allele.opposing {
            let scores = if r < allele.supporting {
                ReadPathScores::new(-8.0, -0.1)
            } else {
                ReadPathScores::new(-0.1, -8.0)
            };
            buffer
                .observe(allele.key.clone(), 0, first_read + r, scores)
                .unwrap();
        }
    }
    buffer
}

proptest! {
    #[test]
    fn selected_alleles_form_a_supported_clique(alleles in prop::collection::vec(allele_strategy(), 1..12)) {
        let buffer = fill_buffer(alleles.iter().enumerate());
        let ploidy = RegionPloidy::diploid();
        let selector = OrthogonalAlleleSelector::new(&buffer, &ploidy, 8);

        for pos in 0..48 {
            let Some(selection) = selector.select(pos).unwrap() else {
                continue;
            };
            prop_assert!(selection.top.len() <= 2);
            prop_assert!(selection.top.is_clique(&buffer).unwrap());
            for &id in selection.top.ids() {
                let record = buffer.record(id).unwrap();
                prop_assert!(record.support.sample(0).unwrap().supporting_reads() > 0);
            }
            if selection.is_reportable {
                let keys = selection.top.keys(&buffer).unwrap();
                prop_assert!(keys.iter().all(|k| k.pos >= pos));
                prop_assert!(keys.iter().any(|k| k.pos == pos));
            }
        }
    }

    #[test]
    fn selection_ignores_observation_order(alleles in prop::collection::vec(allele_strategy(), 1..10)) {
        let forward = fill_buffer(alleles.iter().enumerate());
        let reverse = fill_buffer(alleles.iter().enumerate().rev());
        let ploidy = RegionPloidy::diploid();
        let a = OrthogonalAlleleSelector::new(&forward, &ploidy, 8);
        let b = OrthogonalAlleleSelector::new(&reverse, &ploidy, 8);

        for pos in 0..48 {
            let top_a = a.select(pos).unwrap().map(|s| {
                s.top.keys(&forward).unwrap().into_iter().cloned().collect::<Vec<_>>()
            });
            let top_b = b.select(pos).unwrap().map(|s| {
                s.top.keys(&reverse).unwrap().into_iter().cloned().collect::<Vec<_>>()
            });
            prop_assert_eq!(top_a, top_b);
        }
    }
}

#[test]
fn haploid_region_keeps_one_allele() {
    let alleles = [
        AlleleEvidence {
            key: AlleleKey::deletion(10, 2),
            supporting: 5,
            opposing: 1,
        },
        AlleleEvidence {
            key: AlleleKey::insertion(10, b"GA"),
            supporting: 3,
            opposing: 1,
        },
    ];
    let buffer = fill_buffer(alleles.iter().enumerate());
    let ploidy = RegionPloidy::uniform(1).unwrap();
    let selector = OrthogonalAlleleSelector::new(&buffer, &ploidy, 8);

    let selection = selector.select(10).unwrap().unwrap();
    assert_eq!(selection.orthogonal.len(), 2);
    assert_eq!(selection.top.len(), 1);
    assert_eq!(
        buffer.key(selection.top.ids()[0]).unwrap(),
        &AlleleKey::deletion(10, 2)
    );
    assert!(selection.is_reportable);
}
