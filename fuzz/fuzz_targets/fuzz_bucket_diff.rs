#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qform_core::{Bucket, BucketDiff, FieldDiff, Slot};

#[derive(Debug, Arbitrary)]
enum FuzzSlot {
    Unchanged,
    Set(u8),
    Removed,
}

#[derive(Debug, Arbitrary)]
struct FuzzUpdate {
    field: u8,
    slots: Vec<FuzzSlot>,
}

#[derive(Debug, Arbitrary)]
struct Input {
    updates: Vec<FuzzUpdate>,
    commit_every: u8,
    revert_at_end: bool,
}

fn field_name(raw: u8) -> String {
    // A handful of fields so updates collide.
    format!("f{}", raw % 4)
}

fn field_diff(slots: &[FuzzSlot]) -> FieldDiff {
    slots
        .iter()
        .take(64)
        .map(|slot| match slot {
            FuzzSlot::Unchanged => Slot::Unchanged,
            FuzzSlot::Set(v) => Slot::Set(format!("v{}", v % 8)),
            FuzzSlot::Removed => Slot::Removed,
        })
        .collect()
}

fuzz_target!(|input: Input| {
    let mut bucket = Bucket::new();
    let commit_every = usize::from(input.commit_every.max(1));

    for (step, update) in input.updates.iter().take(128).enumerate() {
        let name = field_name(update.field);
        let diff = field_diff(&update.slots);
        let before = bucket.data_by_name(&name).to_vec();

        let mut expected = before.clone();
        qform_core::bucket::apply(&mut expected, &diff);
        if diff.has_removals() {
            assert!(expected.len() <= diff.effective_len(), "tombstone must truncate");
        }

        let version = bucket.version();
        let published = bucket.set_data(BucketDiff::new().with(name.as_str(), diff));
        assert_eq!(bucket.data_by_name(&name), expected.as_slice(), "merge diverged");

        match published {
            Some(update) => {
                assert_eq!(update.version, version + 1);
                let normalized = update.diff.get(&name).expect("changed field present");
                assert!(!normalized.is_noop(), "normalized diff must change something");
                let mut replay = before;
                qform_core::bucket::apply(&mut replay, normalized);
                assert_eq!(replay, expected, "normalized diff must reproduce the merge");
            }
            None => assert_eq!(bucket.version(), version),
        }

        if (step + 1) % commit_every == 0 {
            bucket.commit();
        }
    }

    if input.revert_at_end {
        bucket.revert();
        assert!(!bucket.is_dirty());
        for name in bucket.view().field_names() {
            assert_eq!(bucket.data_by_name(name), bucket.committed_by_name(name));
        }
    }
});
