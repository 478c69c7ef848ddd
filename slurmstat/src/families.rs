// The metric families.  Each is a declarative `Family`, see aggregate.rs for how they are applied.
//
// The comment before each family shows the command whose output it expects and what one line looks
// like.  Running the commands is the client's business; the field layout is fixed here.

use crate::{classify, Category, Derived, EntityKey, Family, MetricRecord, Quantity, Row};

/// All families, in the order they are usually presented.

pub static ALL: [&Family; 6] = [&NODES, &NODE_INFO, &NODE_MEM, &CPUS, &FILESYSTEM, &USERS];

pub fn by_name(name: &str) -> Option<&'static Family> {
    ALL.iter().find(|f| f.name == name).copied()
}

// Node counts by state, one global record.
//
//   sinfo -h -o %D,%T
//   4,idle
//
// sinfo prints a row per group of nodes with the same state, and once more for every partition the
// group appears in.  We want one count per (count, state) signature, so duplicates are dropped
// first.  States we do not recognize are counted as "other".

pub static NODES: Family = Family {
    name: "nodes",
    delimiter: b',',
    fields: 2..=2,
    dedupe: true,
    initial: &[],
    derived: &[],
    fold: fold_nodes,
};

fn fold_nodes(row: &mut Row) {
    let count = row.number(0);
    let attr = match Category::of(row.text(1)) {
        Some(c) => c.name(),
        None => "other",
    };
    row.accumulate(&EntityKey::Global, attr, count);
}

// Per-node information, keyed by node name.
//
//   sinfo -h -e -N -o %n,%e,%m,%c,%O,%T,%b,%w
//   c1-1,1000,4000,8,2.50,mixed,gpu,10
//
// Free memory, total memory, cpu count, cpu load, state, and optionally active features and weight.
// Everything is last-line-wins.  allocmem is derived from the final total/free pair.  sinfo prints
// N/A for the free memory and load of nodes that are down; those are taken as zero (and counted).
// A feature list that itself contains commas makes the line too long and it is skipped.

pub static NODE_INFO: Family = Family {
    name: "node_info",
    delimiter: b',',
    fields: 6..=8,
    dedupe: false,
    initial: &[],
    derived: &[Derived {
        attr: "allocmem",
        compute: allocated_memory,
    }],
    fold: fold_node_info,
};

fn fold_node_info(row: &mut Row) {
    let name = row.text(0);
    if name.is_empty() {
        return;
    }
    let key = EntityKey::Simple(name.to_string());
    let freemem = row.number(1);
    let totalmem = row.number(2);
    let cpus = row.number(3);
    let cpuload = row.number(4);
    row.overwrite(&key, "freemem", freemem);
    row.overwrite(&key, "totalmem", totalmem);
    row.overwrite(&key, "cpus", cpus);
    row.overwrite(&key, "cpuload", cpuload);
    // As sinfo printed them, for use as labels.
    row.overwrite(&key, "totalmem_text", row.text(2));
    row.overwrite(&key, "cpus_text", row.text(3));
    row.overwrite(&key, "state", row.text(5));
    if row.has(6) {
        row.overwrite(&key, "feature", row.text(6));
    }
    if row.has(7) {
        row.overwrite(&key, "weight", row.text(7));
    }
}

fn allocated_memory(r: &MetricRecord) -> Option<f64> {
    Some(r.number("totalmem")? - r.number("freemem")?)
}

// Memory by (state bucket, feature).
//
//   sinfo -h -N -O NodeHost:64:,AllocMem:16:,FreeMem:16:,Memory:16:,StateLong:24:,Features:256
//   c1-1     :1000     :3000     :4000     :mixed     :gpu
//
// Node, allocated memory, free memory, total memory, long state, features.  The state is classified
// and each contribution accumulates one of the row's quantities into attribute "memory" of its
// bucket: a mixed node adds its allocated memory to "allocated" and its free memory to "idle".
// `sinfo -N` repeats a node for every partition it is in; the node name makes those repeats
// byte-identical and dedupe removes them.

pub static NODE_MEM: Family = Family {
    name: "node_mem",
    delimiter: b':',
    fields: 6..=6,
    dedupe: true,
    initial: &[],
    derived: &[],
    fold: fold_node_mem,
};

fn fold_node_mem(row: &mut Row) {
    let alloc = row.number(1);
    let free = row.number(2);
    let feature = row.text(5);
    for c in classify(row.text(4)) {
        let amount = match c.quantity {
            Quantity::Allocated => alloc,
            Quantity::Free => free,
        };
        let key = EntityKey::Composite(c.bucket.name().to_string(), feature.to_string());
        row.accumulate(&key, "memory", amount);
    }
}

// Cluster-wide CPU totals, one global record.
//
//   sinfo -h -o %C
//   120/344/16/480
//
// Allocated, idle, other, total.  A fifth field (eg from `%C/%f`) is allowed and ignored.  Should
// there be several lines they are summed.

pub static CPUS: Family = Family {
    name: "cpus",
    delimiter: b'/',
    fields: 4..=5,
    dedupe: false,
    initial: &[],
    derived: &[],
    fold: fold_cpus,
};

fn fold_cpus(row: &mut Row) {
    for (i, attr) in ["alloc", "idle", "other", "total"].into_iter().enumerate() {
        let v = row.number(i);
        row.accumulate(&EntityKey::Global, attr, v);
    }
}

// Filesystem usage, keyed by mount path.
//
//   df -hP | awk 'NR>1 && $1 !~ /^(tmpfs|devtmpfs|overlay)$/ {print $6","$2","$3}'
//   /home,1.8T,1.2T
//
// Size and used space, normalized to MB, last line wins.

pub static FILESYSTEM: Family = Family {
    name: "filesystem",
    delimiter: b',',
    fields: 3..=3,
    dedupe: false,
    initial: &[],
    derived: &[],
    fold: fold_filesystem,
};

fn fold_filesystem(row: &mut Row) {
    let path = row.text(0);
    if path.is_empty() {
        return;
    }
    let key = EntityKey::Simple(path.to_string());
    let size = row.megabytes(1);
    let used = row.megabytes(2);
    row.overwrite(&key, "size", size);
    row.overwrite(&key, "used", used);
}

// Job counts, CPUs, and memory per user and job state.
//
//   squeue -a -r -h -o " %A|%u|%T|%C|%m|%r"
//   1001|alice|PENDING|4|2G|QOSMaxCpuPerUserLimit
//
// Job id, user, state, cpus, memory, reason.  Every user seen gets a record with all counters,
// even if none of their jobs is pending, running, or suspended.  Pending jobs are split by whether
// the reason mentions QOS, and the last pending reason seen is kept as a label.

pub const USER_COUNTERS: [&str; 11] = [
    "pending",
    "pendingQOS",
    "pendingOthers",
    "running",
    "suspended",
    "pendingCpus",
    "runningCpus",
    "suspendedCpus",
    "pendingMem",
    "runningMem",
    "suspendedMem",
];

pub static USERS: Family = Family {
    name: "users",
    delimiter: b'|',
    fields: 6..=6,
    dedupe: false,
    initial: &USER_COUNTERS,
    derived: &[],
    fold: fold_users,
};

fn fold_users(row: &mut Row) {
    let user = row.text(1);
    if user.is_empty() {
        return;
    }
    let key = EntityKey::Simple(user.to_string());
    row.touch(&key);

    let category = Category::of(row.text(2));
    let (jobs, cpus_attr, mem_attr) = match category {
        Some(Category::Pending) => ("pending", "pendingCpus", "pendingMem"),
        Some(Category::Running) => ("running", "runningCpus", "runningMem"),
        Some(Category::Suspended) => ("suspended", "suspendedCpus", "suspendedMem"),
        _ => return,
    };
    let cpus = row.number(3);
    let mem = row.megabytes(4);
    row.accumulate(&key, jobs, 1.0);
    row.accumulate(&key, cpus_attr, cpus);
    row.accumulate(&key, mem_attr, mem);

    if category == Some(Category::Pending) {
        let reason = row.text(5);
        row.overwrite(&key, "reason", reason);
        if reason.contains("QOS") {
            row.accumulate(&key, "pendingQOS", 1.0);
        } else {
            row.accumulate(&key, "pendingOthers", 1.0);
        }
    }
}
