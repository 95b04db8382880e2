//! Fingerprint labels: the sole identifiers used for cleanup and selection.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Label key stamped on every object the engine creates.
pub const UUID_LABEL: &str = "kube-burner-uuid";
/// Label key identifying the job that created an object.
pub const JOB_LABEL: &str = "kube-burner-job";

/// Builds the label selector string `kube-burner-uuid=<uuid>` used to scope
/// cleanup and measurement watches to a single run.
pub fn uuid_selector(uuid: &Uuid) -> String {
    format!("{UUID_LABEL}={uuid}")
}

/// Builds a combined selector scoping to both the run and a specific job.
pub fn job_selector(uuid: &Uuid, job_name: &str) -> String {
    format!("{UUID_LABEL}={uuid},{JOB_LABEL}={job_name}")
}

/// Returns the two fingerprint labels every created object must carry.
pub fn fingerprint_labels(uuid: &Uuid, job_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(UUID_LABEL.to_string(), uuid.to_string());
    labels.insert(JOB_LABEL.to_string(), job_name.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_format() {
        let id = Uuid::nil();
        assert_eq!(uuid_selector(&id), format!("kube-burner-uuid={id}"));
        assert_eq!(
            job_selector(&id, "create-pods"),
            format!("kube-burner-uuid={id},kube-burner-job=create-pods")
        );
    }

    #[test]
    fn labels_contain_both_keys() {
        let id = Uuid::nil();
        let labels = fingerprint_labels(&id, "create-pods");
        assert_eq!(labels.get(UUID_LABEL).unwrap(), &id.to_string());
        assert_eq!(labels.get(JOB_LABEL).unwrap(), "create-pods");
    }
}
