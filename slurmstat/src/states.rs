// Classify raw scheduler state strings.
//
// sinfo and squeue decorate their states: `allocated*` (not responding), `idle~` (powered off),
// `mixed-`, `drained@`, and squeue may print `PENDING` or, in some setups, `pending(Resources)`.
// Matching is therefore on a lowercased prefix.  The prefixes are for the long state names (sinfo
// `%T`, `StateLong`, squeue `%T`); the short sinfo forms (`%t`) are not recognized.  Note that
// "completing" must be spelled out so that a COMPLETED job does not land in it.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Pending,
    Running,
    Suspended,
    Allocated,
    Completing,
    Down,
    Drained,
    Idle,
    Maintenance,
    Mixed,
}

// Order matters only if one prefix is a prefix of another, which is not currently the case.

const PREFIXES: [(&str, Category); 10] = [
    ("pending", Category::Pending),
    ("running", Category::Running),
    ("suspended", Category::Suspended),
    ("alloc", Category::Allocated),
    ("completing", Category::Completing),
    ("down", Category::Down),
    ("drain", Category::Drained),
    ("idle", Category::Idle),
    ("maint", Category::Maintenance),
    ("mix", Category::Mixed),
];

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Pending,
        Category::Running,
        Category::Suspended,
        Category::Allocated,
        Category::Completing,
        Category::Down,
        Category::Drained,
        Category::Idle,
        Category::Maintenance,
        Category::Mixed,
    ];

    /// The canonical category of `raw`, if any.

    pub fn of(raw: &str) -> Option<Category> {
        let s = raw.trim().to_lowercase();
        PREFIXES
            .iter()
            .find(|(prefix, _)| s.starts_with(prefix))
            .map(|(_, c)| *c)
    }

    /// The name used for attributes and labels.

    pub fn name(self) -> &'static str {
        match self {
            Category::Pending => "pending",
            Category::Running => "running",
            Category::Suspended => "suspended",
            Category::Allocated => "allocated",
            Category::Completing => "completing",
            Category::Down => "down",
            Category::Drained => "drained",
            Category::Idle => "idle",
            Category::Maintenance => "maintenance",
            Category::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which of a row's quantities a contribution carries.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    Allocated,
    Free,
}

/// One (bucket, quantity) pair: "add this row's `quantity` to the accumulator for `bucket`".

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub bucket: Category,
    pub quantity: Quantity,
}

/// Map a raw state to the buckets it feeds.
///
/// A mixed node is partly allocated and partly free, so it feeds two buckets from one row: its
/// allocated quantity goes to `Allocated` and its free quantity to `Idle`.  An idle node's
/// quantity of interest is what it has free; every other category carries the allocated quantity
/// into its own bucket.  An unrecognized state feeds nothing.

pub fn classify(raw: &str) -> Vec<Contribution> {
    match Category::of(raw) {
        None => vec![],
        Some(Category::Mixed) => vec![
            Contribution {
                bucket: Category::Allocated,
                quantity: Quantity::Allocated,
            },
            Contribution {
                bucket: Category::Idle,
                quantity: Quantity::Free,
            },
        ],
        Some(Category::Idle) => vec![Contribution {
            bucket: Category::Idle,
            quantity: Quantity::Free,
        }],
        Some(bucket) => vec![Contribution {
            bucket,
            quantity: Quantity::Allocated,
        }],
    }
}

#[test]
fn test_category_prefix() {
    assert!(Category::of("allocated*") == Some(Category::Allocated));
    assert!(Category::of("ALLOCATED+") == Some(Category::Allocated));
    assert!(Category::of("pending(Resources)") == Some(Category::Pending));
    assert!(Category::of("PENDING") == Some(Category::Pending));
    assert!(Category::of("idle~") == Some(Category::Idle));
    assert!(Category::of("draining") == Some(Category::Drained));
    assert!(Category::of("drained@") == Some(Category::Drained));
    assert!(Category::of("maint") == Some(Category::Maintenance));
    assert!(Category::of("mixed-") == Some(Category::Mixed));
    assert!(Category::of("completing") == Some(Category::Completing));
    assert!(Category::of("COMPLETED") == None);
    assert!(Category::of("future") == None);
    assert!(Category::of("") == None);
}

#[test]
fn test_classify_mixed_feeds_two_buckets() {
    let c = classify("mixed");
    assert!(c.len() == 2);
    assert!(c.contains(&Contribution { bucket: Category::Allocated, quantity: Quantity::Allocated }));
    assert!(c.contains(&Contribution { bucket: Category::Idle, quantity: Quantity::Free }));
}

#[test]
fn test_classify_single_bucket() {
    assert!(classify("allocated*") == vec![Contribution { bucket: Category::Allocated, quantity: Quantity::Allocated }]);
    assert!(classify("idle") == vec![Contribution { bucket: Category::Idle, quantity: Quantity::Free }]);
    assert!(classify("drained") == vec![Contribution { bucket: Category::Drained, quantity: Quantity::Allocated }]);
    assert!(classify("unknown").is_empty());
}

#[test]
fn test_names_round_trip() {
    for c in Category::ALL {
        assert!(Category::of(c.name()) == Some(c));
    }
}
