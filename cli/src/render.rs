use sectorscan_core::{
    ClusterStatus, ReallocState, RelocationFailure, RelocationReport, SectorReport,
};
use std::fmt::Write;

/// Human-readable form of a sector report
pub fn sector_report(report: &SectorReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sector {} is in cluster {} of volume.", report.sector, report.cluster);

    match &report.status {
        ClusterStatus::InUse { owners, probe } => {
            out.push_str("Cluster is in use.\n");
            if owners.matches.len() > 1 {
                out.push_str(
                    "Unexpectedly got more than one result for files using this cluster!\n",
                );
            }
            out.push_str("File results for this cluster:\n");
            for owner in &owners.matches {
                let _ = writeln!(out, "    {}", owner);
            }
            if owners.truncated {
                out.push_str("    (more files use this cluster than could be listed)\n");
            }
            let _ = writeln!(out, "Testing cluster read... {}.", probe);
        }
        ClusterStatus::Free { probe } => {
            out.push_str("Cluster is not in use.\n");
            let _ = writeln!(out, "Testing cluster read... {}.", probe);
        }
    }
    out
}

pub fn relocation_report(report: &RelocationReport) -> String {
    if report.relocated {
        format!(
            "Moved temp file from cluster {} to cluster {}.\n",
            report.initial_cluster, report.target_cluster
        )
    } else {
        format!("Temp file was placed directly on cluster {}.\n", report.target_cluster)
    }
}

/// Steps a failed reallocation went through, for the operator
pub fn relocation_failure(failure: &RelocationFailure) -> String {
    let steps: Vec<String> = failure
        .states
        .iter()
        .map(|state| match state {
            ReallocState::Failed(_) => "Failed".to_string(),
            other => format!("{:?}", other),
        })
        .collect();

    let mut out = format!(
        "Rewrite of cluster {} stopped: {}\n",
        failure.target_cluster,
        steps.join(" -> ")
    );
    if let Some(cluster) = failure.allocated_cluster {
        let _ = writeln!(out, "The temp file was on cluster {} when the run stopped.", cluster);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectorscan_core::protocol::{
        LOOKUP_STREAM_FLAG_DENY_DEFRAG_SET, LOOKUP_STREAM_FLAG_PAGE_FILE,
    };
    use sectorscan_core::{
        ClusterOwners, ReadProbeResult, SectorScanError, StreamFlags, StreamMatch,
    };

    #[test]
    fn test_in_use_report_lists_owners() {
        let report = SectorReport {
            sector: 2056,
            cluster: 1,
            status: ClusterStatus::InUse {
                owners: ClusterOwners {
                    cluster: 1,
                    matches: vec![StreamMatch {
                        flags: StreamFlags::from_raw(
                            LOOKUP_STREAM_FLAG_PAGE_FILE | LOOKUP_STREAM_FLAG_DENY_DEFRAG_SET,
                        ),
                        file_name: "\\pagefile.sys".to_string(),
                    }],
                    truncated: false,
                },
                probe: ReadProbeResult::Success,
            },
        };

        let text = sector_report(&report);
        assert!(text.contains("cluster 1 of volume"));
        assert!(text.contains("    *PF *DD \\pagefile.sys\n"));
        assert!(text.ends_with("Testing cluster read... success.\n"));
        assert!(!text.contains("more than one result"));
    }

    #[test]
    fn test_free_report_shows_probe() {
        let report = SectorReport {
            sector: 16,
            cluster: 2,
            status: ClusterStatus::Free {
                probe: ReadProbeResult::CrcFailure,
            },
        };

        let text = sector_report(&report);
        assert!(text.contains("Cluster is not in use."));
        assert!(text.contains("failed with CRC error (err 23)"));
    }

    #[test]
    fn test_relocation_summary() {
        let mut report = RelocationReport {
            target_cluster: 700,
            initial_cluster: 50,
            relocated: true,
            states: vec![ReallocState::Completed],
        };
        assert_eq!(relocation_report(&report), "Moved temp file from cluster 50 to cluster 700.\n");

        report.relocated = false;
        assert!(relocation_report(&report).contains("directly on cluster 700"));
    }

    #[test]
    fn test_failure_lists_steps() {
        let failure = RelocationFailure {
            target_cluster: 700,
            allocated_cluster: Some(50),
            states: vec![
                ReallocState::CreateTemp,
                ReallocState::FillOneCluster,
                ReallocState::QueryPlacement,
                ReallocState::Relocate,
                ReallocState::Cleanup,
                ReallocState::Failed("FSCTL_MOVE_FILE failed with error 5".to_string()),
            ],
            error: SectorScanError::Resource("x".to_string()),
        };

        let text = relocation_failure(&failure);
        assert!(text.starts_with(concat!(
            "Rewrite of cluster 700 stopped: CreateTemp -> FillOneCluster -> ",
            "QueryPlacement -> Relocate -> Cleanup -> Failed\n",
        )));
        assert!(text.contains("cluster 50"));
    }
}
