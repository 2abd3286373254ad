//! `GET /lti/config/{name}`: LMS auto-configuration cartridge.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use url::Url;

use super::LtiState;
use super::request_url::request_origin;
use crate::error::LaunchError;
use crate::types::ToolProvider;

/// Namespace of the cartridge root element.
pub const IMS_CC_NAMESPACE: &str = "http://www.imsglobal.org/xsd/imslticc_v1p0";
/// Namespace of the `blti:` elements.
pub const BLTI_NAMESPACE: &str = "http://www.imsglobal.org/xsd/imsbasiclti_v1p0";
const LTICM_NAMESPACE: &str = "http://www.imsglobal.org/xsd/imslticm_v1p0";
const LTICP_NAMESPACE: &str = "http://www.imsglobal.org/xsd/imslticp_v1p0";

/// Serves the configuration cartridge for the named tool provider.
pub async fn config_handler(
    State(state): State<LtiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, LaunchError> {
    let provider = state.service.tool_provider(&name).await?;
    let origin = request_origin(
        &headers,
        state.base_url.as_ref(),
        state.trust_forwarded_headers,
    )?;
    let launch_url = origin
        .join(&provider.launch_path)
        .map_err(|e| LaunchError::configuration(format!("invalid launch_path: {e}")))?;

    let body = render_cartridge(&provider, &launch_url);
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml"),
        )],
        body,
    )
        .into_response())
}

/// Rewrites a leading `http:` to `https:`.
#[must_use]
pub fn as_https(url: &str) -> String {
    match url.strip_prefix("http:") {
        Some(rest) => format!("https:{rest}"),
        None => url.to_string(),
    }
}

/// Renders the `cartridge_basiclti_link` document for `provider`.
#[must_use]
pub fn render_cartridge(provider: &ToolProvider, launch_url: &Url) -> String {
    let launch = launch_url.as_str();
    let domain = launch_url.host_str().unwrap_or_default();

    let visibility = if provider.visibility.as_str().is_empty() {
        String::new()
    } else {
        format!(
            "\n      <lticm:property name=\"visibility\">{}</lticm:property>",
            xml_escape(provider.visibility.as_str())
        )
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<cartridge_basiclti_link xmlns="{ims}"
    xmlns:blti="{blti}"
    xmlns:lticm="{lticm}"
    xmlns:lticp="{lticp}">
  <blti:title>{title}</blti:title>
  <blti:description>{description}</blti:description>
  <blti:launch_url>{launch_url}</blti:launch_url>
  <blti:secure_launch_url>{secure_launch_url}</blti:secure_launch_url>
  <blti:icon>{icon}</blti:icon>
  <blti:secure_icon>{secure_icon}</blti:secure_icon>
  <blti:extensions platform="canvas.instructure.com">
    <lticm:property name="privacy_level">public</lticm:property>
    <lticm:property name="domain">{domain}</lticm:property>
    <lticm:options name="course_navigation">
      <lticm:property name="enabled">true</lticm:property>
      <lticm:property name="text">{title}</lticm:property>{visibility}
    </lticm:options>
  </blti:extensions>
</cartridge_basiclti_link>
"#,
        ims = IMS_CC_NAMESPACE,
        blti = BLTI_NAMESPACE,
        lticm = LTICM_NAMESPACE,
        lticp = LTICP_NAMESPACE,
        title = xml_escape(&provider.display_name),
        description = xml_escape(&provider.description),
        launch_url = xml_escape(launch),
        secure_launch_url = xml_escape(&as_https(launch)),
        icon = xml_escape(&provider.icon_url),
        secure_icon = xml_escape(&as_https(&provider.icon_url)),
        domain = xml_escape(domain),
        visibility = visibility,
    )
}

/// Escapes XML special characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Visibility;

    fn provider() -> ToolProvider {
        ToolProvider {
            name: "test".into(),
            display_name: "Grader & Co".into(),
            description: "test".into(),
            icon_url: "http://tool.example/icon.png".into(),
            launch_path: "/test".into(),
            visibility: Visibility::Members,
        }
    }

    #[test]
    fn test_as_https() {
        assert_eq!(as_https("http://a/b"), "https://a/b");
        assert_eq!(as_https("https://a/b"), "https://a/b");
        assert_eq!(as_https(""), "");
    }

    #[test]
    fn test_render_cartridge() {
        let url = Url::parse("http://tool.example/test").unwrap();
        let xml = render_cartridge(&provider(), &url);

        assert!(xml.contains(r#"xmlns="http://www.imsglobal.org/xsd/imslticc_v1p0""#));
        assert!(xml.contains(r#"xmlns:blti="http://www.imsglobal.org/xsd/imsbasiclti_v1p0""#));
        assert!(xml.contains("<blti:title>Grader &amp; Co</blti:title>"));
        assert!(xml.contains("<blti:launch_url>http://tool.example/test</blti:launch_url>"));
        assert!(xml.contains(
            "<blti:secure_launch_url>https://tool.example/test</blti:secure_launch_url>"
        ));
        assert!(xml.contains("<blti:secure_icon>https://tool.example/icon.png</blti:secure_icon>"));
        assert!(xml.contains(r#"<lticm:property name="domain">tool.example</lticm:property>"#));
        assert!(xml.contains(r#"<lticm:property name="visibility">members</lticm:property>"#));
    }

    #[test]
    fn test_visibility_all_is_omitted() {
        let mut p = provider();
        p.visibility = Visibility::All;
        let xml = render_cartridge(&p, &Url::parse("http://tool.example/test").unwrap());
        assert!(!xml.contains("visibility"));
    }
}
