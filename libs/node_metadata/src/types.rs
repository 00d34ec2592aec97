use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MetadataError;

/// A single attached device, as listed in the `devices` array of `meta_data.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Device kind, `disk` for block volumes.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bus: String,
    /// Matches the backend volume identifier for attached volumes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
}

impl DeviceMetadata {
    pub fn is_disk(&self) -> bool {
        self.kind == "disk"
    }
}

/// Instance metadata fetched from the metadata service or the config drive.
/// Assumes the "latest" `meta_data.json` format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "uuid", default)]
    pub instance_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub devices: Vec<DeviceMetadata>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Metadata {
    /// Decodes a `meta_data.json` document. A document without a `uuid`, or with
    /// an empty one, is rejected as [`MetadataError::Malformed`].
    pub fn parse(document: &[u8]) -> Result<Metadata, MetadataError> {
        let metadata: Metadata = serde_json::from_slice(document).map_err(MetadataError::Parse)?;
        if metadata.instance_id.is_empty() {
            return Err(MetadataError::Malformed);
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_document() {
        let document = br#"{
            "uuid": "83679162-1378-4288-a2d4-70e13ec132aa",
            "name": "test",
            "availability_zone": "nova",
            "hostname": "test.novalocal",
            "devices": [
                {"type": "nic", "bus": "pci", "address": "0000:00:02.0", "mac": "00:00:00:00:00:01"},
                {"type": "disk", "bus": "scsi", "serial": "6df1888b-f373-41cf-b960-3786e60a28ef", "address": "1:0:0:0"}
            ]
        }"#;

        let metadata = Metadata::parse(document).unwrap();
        assert_eq!(metadata.instance_id, "83679162-1378-4288-a2d4-70e13ec132aa");
        assert_eq!(metadata.name, "test");
        assert_eq!(metadata.availability_zone, "nova");
        assert_eq!(metadata.devices.len(), 2);

        let nic = &metadata.devices[0];
        assert!(!nic.is_disk());
        assert_eq!(nic.serial, "");

        let disk = &metadata.devices[1];
        assert!(disk.is_disk());
        assert_eq!(disk.bus, "scsi");
        assert_eq!(disk.serial, "6df1888b-f373-41cf-b960-3786e60a28ef");
        assert_eq!(disk.address, "1:0:0:0");
    }

    #[test]
    fn empty_uuid_is_malformed() {
        let document = br#"{"uuid": "", "name": "test", "availability_zone": "nova", "devices": []}"#;
        assert!(matches!(
            Metadata::parse(document),
            Err(MetadataError::Malformed)
        ));

        let document = br#"{"name": "test", "availability_zone": "nova"}"#;
        assert!(matches!(
            Metadata::parse(document),
            Err(MetadataError::Malformed)
        ));
    }

    #[test]
    fn null_devices_and_untyped_entries() {
        let metadata = Metadata::parse(br#"{"uuid": "abc-1", "devices": null}"#).unwrap();
        assert!(metadata.devices.is_empty());

        let metadata =
            Metadata::parse(br#"{"uuid": "abc-1", "devices": [{"serial": "vol-1"}]}"#).unwrap();
        assert_eq!(metadata.devices.len(), 1);
        assert_eq!(metadata.devices[0].kind, "");
        assert!(!metadata.devices[0].is_disk());
    }

    #[test]
    fn invalid_json_is_parse_error() {
        assert!(matches!(
            Metadata::parse(b"<html>not json</html>"),
            Err(MetadataError::Parse(_))
        ));
    }
}
