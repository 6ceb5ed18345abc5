//! Lookup of transforms by the formats they convert between.

use std::fmt;
use std::sync::Arc;

use crate::format::MediaFormat;

use super::{PcmConverter, Transform};

/// Creates a fresh, unconfigured transform.
pub type CodecFactory = Arc<dyn Fn() -> Box<dyn Transform> + Send + Sync>;

struct Entry {
    name: String,
    inputs: Vec<MediaFormat>,
    factory: CodecFactory,
}

/// An ordered set of transform factories.
///
/// Registration order is search order: when several chains could convert a
/// format, the one built from the earliest registered transforms wins.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    entries: Vec<Arc<Entry>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in PCM converter.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(PcmConverter::codec()));
        registry
    }

    /// Appends a transform factory.
    pub fn register<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Transform> + Send + Sync + 'static,
    {
        let instance = factory();
        self.entries.push(Arc::new(Entry {
            name: instance.name().to_string(),
            inputs: instance.supported_input_formats().to_vec(),
            factory: Arc::new(factory),
        }));
        self
    }

    /// Names of the registered transforms, in search order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Formats `current` can be turned into: `current` itself followed by the
    /// outputs of every transform accepting it.
    pub fn supported_formats(&self, current: &MediaFormat) -> Vec<MediaFormat> {
        let mut formats = vec![current.clone()];
        for entry in &self.entries {
            if !entry.inputs.iter().any(|i| current.matches(i)) {
                continue;
            }
            for output in (entry.factory)().supported_output_formats(Some(current)) {
                if !formats.contains(&output) {
                    formats.push(output);
                }
            }
        }
        formats
    }

    /// Builds a chain of at most two transforms converting `from` into `to`,
    /// with their formats negotiated.
    ///
    /// An empty chain means no conversion is needed. `None` means no chain
    /// was found.
    pub fn find_chain(
        &self,
        from: &MediaFormat,
        to: &MediaFormat,
    ) -> Option<Vec<Box<dyn Transform>>> {
        if from.matches(to) {
            return Some(Vec::new());
        }

        for entry in &self.entries {
            if let Some(single) = Self::hop(entry, from, to) {
                tracing::debug!(
                    from = %from,
                    to = %to,
                    codec = %entry.name,
                    "direct conversion found"
                );
                return Some(vec![single]);
            }
        }

        for first in &self.entries {
            let instance = (first.factory)();
            for candidate in instance.supported_output_formats(Some(from)) {
                let middle = candidate.fill_from(from);
                if middle.matches(from) {
                    continue;
                }
                for second in &self.entries {
                    let Some(tail) = Self::hop(second, &middle, to) else {
                        continue;
                    };
                    if let Some(head) = Self::hop(first, from, &middle) {
                        tracing::debug!(
                            from = %from,
                            via = %middle,
                            to = %to,
                            "two-step conversion found"
                        );
                        return Some(vec![head, tail]);
                    }
                }
            }
        }

        tracing::debug!(from = %from, to = %to, "no conversion found");
        None
    }

    /// Instantiates `entry` with `from` as input and `to` as output.
    fn hop(entry: &Entry, from: &MediaFormat, to: &MediaFormat) -> Option<Box<dyn Transform>> {
        if !entry.inputs.iter().any(|i| from.matches(i)) {
            return None;
        }
        let mut transform = (entry.factory)();
        let outputs = transform.supported_output_formats(Some(from));
        let output = outputs.iter().find_map(|o| to.intersects(o))?;
        transform.set_input_format(from)?;
        transform.set_output_format(&output)?;
        Some(transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, CodecProcessor, NegotiatedFormats, ProcessStatus};
    use crate::format::{encoding, AudioFormat, FormatFamily};
    use crate::frame::Frame;

    struct Relabel;

    impl CodecProcessor for Relabel {
        fn do_process(
            &mut self,
            formats: &NegotiatedFormats,
            input: &mut Frame,
            output: &mut Frame,
        ) -> ProcessStatus {
            output.copy_from(input);
            output.format.clone_from(&formats.output);
            ProcessStatus::OK
        }
    }

    fn ulaw() -> MediaFormat {
        AudioFormat::new(encoding::ULAW)
            .with_sample_rate(8000.0)
            .with_channels(1)
            .into()
    }

    fn ulaw_decoder() -> Box<dyn Transform> {
        Box::new(Codec::new(
            "ulaw decoder",
            FormatFamily::Audio,
            vec![AudioFormat::new(encoding::ULAW).into()],
            vec![AudioFormat::linear(8000.0, 16, 1).into()],
            Relabel,
        ))
    }

    #[test]
    fn test_same_format_needs_no_chain() {
        let registry = CodecRegistry::with_defaults();
        let f: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        assert!(registry.find_chain(&f, &f).unwrap().is_empty());
    }

    #[test]
    fn test_resample_is_one_hop() {
        let registry = CodecRegistry::with_defaults();
        let from: MediaFormat = AudioFormat::linear(48000.0, 16, 2).into();
        let to: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        let chain = registry.find_chain(&from, &to).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name(), PcmConverter::NAME);
        assert_eq!(chain[0].input_format(), Some(&from));
        assert!(chain[0].output_format().unwrap().matches(&to));
    }

    #[test]
    fn test_two_hop_chain() {
        let mut registry = CodecRegistry::with_defaults();
        registry.register(ulaw_decoder);
        let to: MediaFormat = AudioFormat::linear(16000.0, 16, 1).into();
        let chain = registry.find_chain(&ulaw(), &to).unwrap();
        let names: Vec<&str> = chain.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["ulaw decoder", PcmConverter::NAME]);
    }

    #[test]
    fn test_unreachable_format() {
        let registry = CodecRegistry::with_defaults();
        let to: MediaFormat = AudioFormat::new(encoding::OPUS).into();
        assert!(registry.find_chain(&ulaw(), &to).is_none());
        assert!(CodecRegistry::new().is_empty());
    }

    #[test]
    fn test_supported_formats_lists_current_first() {
        let mut registry = CodecRegistry::with_defaults();
        registry.register(ulaw_decoder);
        let formats = registry.supported_formats(&ulaw());
        assert_eq!(formats[0], ulaw());
        assert_eq!(formats.len(), 2);
        assert_eq!(registry.names(), vec![PcmConverter::NAME, "ulaw decoder"]);
    }
}
