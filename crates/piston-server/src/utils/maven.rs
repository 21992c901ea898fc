/// Convert maven coordinates to a repository-relative path.
///
/// `group:artifact:version[:classifier][@extension]` ->
/// `group/as/dirs/artifact/version/artifact-version[-classifier].extension`
pub fn maven_to_path(coords: &str) -> Option<String> {
    let (coords, extension) = match coords.split_once('@') {
        Some((c, ext)) => (c, ext),
        None => (coords, "jar"),
    };
    let parts: Vec<&str> = coords.split(':').collect();
    if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let group = parts[0].replace('.', "/");
    let artifact = parts[1];
    let version = parts[2];
    let filename = match parts.get(3) {
        Some(classifier) => format!("{}-{}-{}.{}", artifact, version, classifier, extension),
        None => format!("{}-{}.{}", artifact, version, extension),
    };

    Some(format!("{}/{}/{}/{}", group, artifact, version, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_plain_and_classified_coordinates() {
        assert_eq!(
            maven_to_path("org.quiltmc:quilt-loader:0.26.0").as_deref(),
            Some("org/quiltmc/quilt-loader/0.26.0/quilt-loader-0.26.0.jar")
        );
        assert_eq!(
            maven_to_path("net.minecraftforge:forge:1.20.1-47.2.0:installer").as_deref(),
            Some("net/minecraftforge/forge/1.20.1-47.2.0/forge-1.20.1-47.2.0-installer.jar")
        );
        assert_eq!(
            maven_to_path("de.oceanlabs.mcp:mcp_config:1.20.1@zip").as_deref(),
            Some("de/oceanlabs/mcp/mcp_config/1.20.1/mcp_config-1.20.1.zip")
        );
        assert_eq!(maven_to_path("broken:coords"), None);
    }
}
