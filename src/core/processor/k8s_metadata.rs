// SPDX-License-Identifier: MIT OR Apache-2.0

//! K8s Metadata Labeling Processor
//!
//! Enriches metric and span events carrying `container.id` or `remote_ip`
//! tags with cached pod metadata. Cache misses are accumulated across the
//! whole group, fetched from the provider in one batched round-trip, and
//! the missed events are then reprocessed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::config::context::AgentContext;
use crate::core::event::{PipelineEvent, PipelineEventGroup, StringView};
use crate::core::exception::LogFluxResult;
use crate::core::pipeline::processor::Processor;

const CONTAINER_ID_TAG: &[u8] = b"container.id";
const REMOTE_IP_TAG: &[u8] = b"remote_ip";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodMetadata {
    pub workload_name: String,
    pub workload_kind: String,
    pub namespace: String,
    pub service_name: String,
    pub app_id: String,
}

/// Server lookup seam; the wire protocol lives with the cluster plugin.
pub trait PodMetadataProvider: Send + Sync {
    fn get_by_container_ids(&self, ids: &[String]) -> HashMap<String, PodMetadata>;
    fn get_by_ips(&self, ips: &[String]) -> HashMap<String, PodMetadata>;
}

#[derive(Default)]
pub struct ProcessorK8sMetadata {
    provider: Option<Arc<dyn PodMetadataProvider>>,
    container_cache: Mutex<HashMap<String, PodMetadata>>,
    ip_cache: Mutex<HashMap<String, PodMetadata>>,
}

enum TagTarget {
    Own,
    Peer,
}

impl ProcessorK8sMetadata {
    pub fn new(provider: Arc<dyn PodMetadataProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Default::default()
        }
    }

    pub fn set_provider(&mut self, provider: Arc<dyn PodMetadataProvider>) {
        self.provider = Some(provider);
    }

    /// Tries to label one event from the caches; records the keys it could
    /// not resolve. Returns whether the event is fully labeled.
    fn process_event(
        &self,
        event: &mut PipelineEvent,
        pending_containers: &mut Vec<String>,
        pending_ips: &mut Vec<String>,
        writes: &mut Vec<(usize, TagTarget, PodMetadata)>,
        index: usize,
    ) -> bool {
        if !self.supports(event) {
            return true;
        }
        let (container_id, remote_ip) = match event {
            PipelineEvent::Metric(m) => (
                m.get_tag(CONTAINER_ID_TAG).map(|v| v.as_str().to_string()),
                m.get_tag(REMOTE_IP_TAG).map(|v| v.as_str().to_string()),
            ),
            PipelineEvent::Span(s) => (
                s.get_tag(CONTAINER_ID_TAG).map(|v| v.as_str().to_string()),
                s.get_tag(REMOTE_IP_TAG).map(|v| v.as_str().to_string()),
            ),
            _ => (None, None),
        };

        let mut complete = true;
        if let Some(container_id) = container_id.filter(|v| !v.is_empty()) {
            let cached = self
                .container_cache
                .lock()
                .expect("container cache lock")
                .get(&container_id)
                .cloned();
            match cached {
                Some(info) => writes.push((index, TagTarget::Own, info)),
                None => {
                    pending_containers.push(container_id);
                    complete = false;
                }
            }
        }
        if let Some(remote_ip) = remote_ip.filter(|v| !v.is_empty()) {
            let cached = self
                .ip_cache
                .lock()
                .expect("ip cache lock")
                .get(&remote_ip)
                .cloned();
            match cached {
                Some(info) => writes.push((index, TagTarget::Peer, info)),
                None => {
                    pending_ips.push(remote_ip);
                    complete = false;
                }
            }
        }
        complete
    }

    fn apply_writes(
        group: &mut PipelineEventGroup,
        writes: Vec<(usize, TagTarget, PodMetadata)>,
    ) {
        for (index, target, info) in writes {
            let tags: Vec<(StringView, StringView)> = match target {
                TagTarget::Own => vec![
                    (StringView::from_static("workloadName"), group.copy_string(&info.workload_name)),
                    (StringView::from_static("workloadKind"), group.copy_string(&info.workload_kind)),
                    (StringView::from_static("namespace"), group.copy_string(&info.namespace)),
                    (StringView::from_static("serviceName"), group.copy_string(&info.service_name)),
                    (StringView::from_static("pid"), group.copy_string(&info.app_id)),
                ],
                TagTarget::Peer => vec![
                    (StringView::from_static("peerWorkloadName"), group.copy_string(&info.workload_name)),
                    (StringView::from_static("peerWorkloadKind"), group.copy_string(&info.workload_kind)),
                    (StringView::from_static("peerNamespace"), group.copy_string(&info.namespace)),
                ],
            };
            match &mut group.events_mut()[index] {
                PipelineEvent::Metric(m) => {
                    for (k, v) in tags {
                        m.set_tag(k, v);
                    }
                }
                PipelineEvent::Span(s) => {
                    for (k, v) in tags {
                        s.set_tag(k, v);
                    }
                }
                _ => {}
            }
        }
    }

    fn fetch_missing(&self, containers: &[String], ips: &[String]) {
        let Some(provider) = &self.provider else {
            return;
        };
        if !containers.is_empty() {
            let fetched = provider.get_by_container_ids(containers);
            let mut cache = self.container_cache.lock().expect("container cache lock");
            cache.extend(fetched);
        }
        if !ips.is_empty() {
            let fetched = provider.get_by_ips(ips);
            let mut cache = self.ip_cache.lock().expect("ip cache lock");
            cache.extend(fetched);
        }
    }
}

impl Processor for ProcessorK8sMetadata {
    fn name(&self) -> &'static str {
        "processor_k8s_metadata"
    }

    fn init(&mut self, _config: &serde_json::Value, _ctx: &AgentContext) -> LogFluxResult<()> {
        Ok(())
    }

    fn supports(&self, event: &PipelineEvent) -> bool {
        event.is_metric() || event.is_span()
    }

    fn process(&self, group: &mut PipelineEventGroup) {
        if group.is_empty() {
            return;
        }

        let mut pending_containers = Vec::new();
        let mut pending_ips = Vec::new();
        let mut missed = Vec::new();
        let mut writes = Vec::new();

        let event_count = group.events().len();
        for index in 0..event_count {
            let mut event = std::mem::replace(
                &mut group.events_mut()[index],
                PipelineEvent::Raw(Default::default()),
            );
            let complete = self.process_event(
                &mut event,
                &mut pending_containers,
                &mut pending_ips,
                &mut writes,
                index,
            );
            group.events_mut()[index] = event;
            if !complete {
                missed.push(index);
            }
        }
        Self::apply_writes(group, std::mem::take(&mut writes));

        if missed.is_empty() {
            return;
        }
        // One batched round-trip for everything the caches were missing,
        // then the missed events get a second pass.
        self.fetch_missing(&pending_containers, &pending_ips);
        pending_containers.clear();
        pending_ips.clear();
        for index in missed {
            let mut event = std::mem::replace(
                &mut group.events_mut()[index],
                PipelineEvent::Raw(Default::default()),
            );
            self.process_event(
                &mut event,
                &mut pending_containers,
                &mut pending_ips,
                &mut writes,
                index,
            );
            group.events_mut()[index] = event;
        }
        Self::apply_writes(group, writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{MetricValue, SourceBuffer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapProvider {
        containers: HashMap<String, PodMetadata>,
        ips: HashMap<String, PodMetadata>,
        calls: AtomicUsize,
    }

    impl MapProvider {
        fn new() -> Self {
            let mut containers = HashMap::new();
            containers.insert(
                "c-1".to_string(),
                PodMetadata {
                    workload_name: "web".to_string(),
                    workload_kind: "Deployment".to_string(),
                    namespace: "prod".to_string(),
                    service_name: "web-svc".to_string(),
                    app_id: "1234".to_string(),
                },
            );
            let mut ips = HashMap::new();
            ips.insert(
                "10.1.2.3".to_string(),
                PodMetadata {
                    workload_name: "db".to_string(),
                    workload_kind: "StatefulSet".to_string(),
                    namespace: "prod".to_string(),
                    service_name: "db-svc".to_string(),
                    app_id: "5678".to_string(),
                },
            );
            Self {
                containers,
                ips,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PodMetadataProvider for MapProvider {
        fn get_by_container_ids(&self, ids: &[String]) -> HashMap<String, PodMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ids.iter()
                .filter_map(|id| self.containers.get(id).map(|m| (id.clone(), m.clone())))
                .collect()
        }

        fn get_by_ips(&self, ips: &[String]) -> HashMap<String, PodMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ips.iter()
                .filter_map(|ip| self.ips.get(ip).map(|m| (ip.clone(), m.clone())))
                .collect()
        }
    }

    fn group_with_tagged_metrics(tags: &[&[(&str, &str)]]) -> PipelineEventGroup {
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        for event_tags in tags {
            let views: Vec<(StringView, StringView)> = event_tags
                .iter()
                .map(|(k, v)| (group.copy_string(k), group.copy_string(v)))
                .collect();
            let e = group.add_metric_event();
            e.set_value(MetricValue::UntypedSingle(1.0));
            for (k, v) in views {
                e.set_tag(k, v);
            }
        }
        group
    }

    #[test]
    fn test_miss_then_batched_fetch_then_labels() {
        let provider = Arc::new(MapProvider::new());
        let processor = ProcessorK8sMetadata::new(provider.clone());

        let mut group = group_with_tagged_metrics(&[
            &[("container.id", "c-1")],
            &[("remote_ip", "10.1.2.3")],
            &[("unrelated", "x")],
        ]);
        processor.process(&mut group);

        // One batched call per key family.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let m0 = group.events()[0].as_metric().expect("metric");
        assert_eq!(m0.get_tag(b"workloadName").map(|v| v.as_str()), Some("web"));
        assert_eq!(m0.get_tag(b"workloadKind").map(|v| v.as_str()), Some("Deployment"));
        assert_eq!(m0.get_tag(b"namespace").map(|v| v.as_str()), Some("prod"));
        assert_eq!(m0.get_tag(b"serviceName").map(|v| v.as_str()), Some("web-svc"));
        assert_eq!(m0.get_tag(b"pid").map(|v| v.as_str()), Some("1234"));

        let m1 = group.events()[1].as_metric().expect("metric");
        assert_eq!(m1.get_tag(b"peerWorkloadName").map(|v| v.as_str()), Some("db"));
        assert_eq!(m1.get_tag(b"peerWorkloadKind").map(|v| v.as_str()), Some("StatefulSet"));
        assert_eq!(m1.get_tag(b"peerNamespace").map(|v| v.as_str()), Some("prod"));

        let m2 = group.events()[2].as_metric().expect("metric");
        assert!(m2.get_tag(b"workloadName").is_none());
    }

    #[test]
    fn test_cache_hit_avoids_provider() {
        let provider = Arc::new(MapProvider::new());
        let processor = ProcessorK8sMetadata::new(provider.clone());

        let mut first = group_with_tagged_metrics(&[&[("container.id", "c-1")]]);
        processor.process(&mut first);
        let calls_after_first = provider.calls.load(Ordering::SeqCst);

        let mut second = group_with_tagged_metrics(&[&[("container.id", "c-1")]]);
        processor.process(&mut second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first);
        let m = second.events()[0].as_metric().expect("metric");
        assert_eq!(m.get_tag(b"workloadName").map(|v| v.as_str()), Some("web"));
    }

    #[test]
    fn test_unknown_keys_stay_unlabeled() {
        let provider = Arc::new(MapProvider::new());
        let processor = ProcessorK8sMetadata::new(provider);
        let mut group = group_with_tagged_metrics(&[&[("container.id", "nope")]]);
        processor.process(&mut group);
        let m = group.events()[0].as_metric().expect("metric");
        assert!(m.get_tag(b"workloadName").is_none());
    }
}
