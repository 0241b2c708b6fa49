//! Error rendering for CLI output.

use hoist_core::PublishError;

/// Render an error and its causes on one line, followed by a remediation
/// hint when the error carries one.
pub fn render_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = format!("Error: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // Wrappers that embed their cause in their own message
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }

    if let Some(hint) = err.downcast_ref::<PublishError>().and_then(|e| e.hint()) {
        message.push_str("\nhint: ");
        message.push_str(hint);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::PublishStage;

    #[test]
    fn test_render_stage_chain() {
        let err = PublishError::Authentication {
            registry: "docker.io".to_string(),
            message: "denied: requested access to the resource is denied".to_string(),
        }
        .at_stage(PublishStage::InvocationImagePushed, "myapp:v1");

        assert_eq!(
            render_error(&err),
            "Error: unable to push CNAB invocation image: myapp:v1: Authentication failed: \
             docker.io - denied: requested access to the resource is denied"
        );
    }

    #[test]
    fn test_render_hint() {
        let err = PublishError::config_with_hint("could not find hoist.yaml", "specify --file")
            .at_stage(PublishStage::ManifestLoaded, ".");
        let rendered = render_error(&err);
        assert!(rendered.starts_with("Error: unable to load manifest: .: Configuration error"));
        assert!(rendered.ends_with("\nhint: specify --file"));
    }

    #[test]
    fn test_render_plain_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(render_error(&err), "Error: boom");
    }
}
