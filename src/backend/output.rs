use super::{BackendError, MachineStatus};

/// One line of `vagrant --machine-readable` output:
/// `timestamp,target,type,data...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineReadableLine {
    pub timestamp: u64,
    pub target: String,
    pub kind: String,
    pub data: Vec<String>,
}

/// A box reported by `vagrant box list`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstalledBox {
    pub name: String,
    pub provider: Option<String>,
    pub version: Option<String>,
}

/// Decode machine-readable output, undoing Vagrant's comma and newline escapes.
pub fn parse_machine_readable(output: &str) -> Result<Vec<MachineReadableLine>, BackendError> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<MachineReadableLine, BackendError> {
    let mut fields = line.split(',');

    let (Some(timestamp), Some(target), Some(kind)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(BackendError::MalformedOutput(format!(
            "expected timestamp,target,type: {}",
            line
        )));
    };

    let timestamp = timestamp.parse().map_err(|_| {
        BackendError::MalformedOutput(format!("bad timestamp '{}' in: {}", timestamp, line))
    })?;

    Ok(MachineReadableLine {
        timestamp,
        target: target.to_string(),
        kind: kind.to_string(),
        data: fields.map(unescape).collect(),
    })
}

fn unescape(field: &str) -> String {
    field
        .replace("%!(VAGRANT_COMMA)", ",")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
}

/// Extract `(name, state)` pairs from `vagrant status --machine-readable`.
pub fn statuses(lines: &[MachineReadableLine]) -> Result<Vec<MachineStatus>, BackendError> {
    let statuses: Vec<MachineStatus> = lines
        .iter()
        .filter(|line| line.kind == "state")
        .map(|line| {
            line.data
                .first()
                .map(|state| MachineStatus {
                    name: line.target.clone(),
                    state: state.clone(),
                })
                .ok_or_else(|| {
                    BackendError::MalformedOutput(format!("state line without value for {}", line.target))
                })
        })
        .collect::<Result<_, _>>()?;

    if statuses.is_empty() {
        return Err(BackendError::MalformedOutput(
            "status output contains no machine state".to_string(),
        ));
    }

    Ok(statuses)
}

/// Extract installed boxes from `vagrant box list --machine-readable`.
pub fn installed_boxes(lines: &[MachineReadableLine]) -> Vec<InstalledBox> {
    let mut boxes: Vec<InstalledBox> = Vec::new();

    for line in lines {
        let value = line.data.first().cloned();
        match line.kind.as_str() {
            "box-name" => boxes.push(InstalledBox {
                name: value.unwrap_or_default(),
                ..Default::default()
            }),
            "box-provider" => {
                if let Some(last) = boxes.last_mut() {
                    last.provider = value;
                }
            }
            "box-version" => {
                if let Some(last) = boxes.last_mut() {
                    last.version = value;
                }
            }
            _ => {}
        }
    }

    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
1412345678,default,metadata,provider,virtualbox
1412345678,default,provider-name,virtualbox
1412345678,default,state,running
1412345678,default,state-human-short,running
1412345678,default,state-human-long,The VM is running.%!(VAGRANT_COMMA) To stop this VM\\nrun `vagrant halt`.
1412345678,,ui,info,Current machine states:
";

    #[test]
    fn test_parse_status_output() {
        let lines = parse_machine_readable(STATUS).unwrap();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0].timestamp, 1412345678);
        assert_eq!(lines[0].target, "default");
        assert_eq!(lines[0].kind, "metadata");
        assert_eq!(lines[0].data, vec!["provider", "virtualbox"]);

        let long = &lines[4].data[0];
        assert!(long.starts_with("The VM is running., To stop"));
        assert!(long.contains('\n'));

        let statuses = statuses(&lines).unwrap();
        assert_eq!(
            statuses,
            vec![MachineStatus {
                name: "default".to_string(),
                state: "running".to_string()
            }]
        );
        assert!(statuses[0].is_running());
    }

    #[test]
    fn test_status_without_state_is_malformed() {
        let lines = parse_machine_readable("1412345678,,ui,info,nothing here\n").unwrap();
        assert!(matches!(
            statuses(&lines),
            Err(BackendError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_machine_readable("Vagrant is upgrading some plugins"),
            Err(BackendError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_machine_readable("soon,default,state,running"),
            Err(BackendError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_box_list() {
        let output = "\
1412345678,,box-name,win7-slave
1412345678,,box-provider,virtualbox
1412345678,,box-version,0
1412345679,,box-name,ubuntu/trusty64
1412345679,,box-provider,virtualbox
1412345679,,box-version,20190411.0.0
";
        let lines = parse_machine_readable(output).unwrap();
        let boxes = installed_boxes(&lines);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].name, "win7-slave");
        assert_eq!(boxes[0].provider.as_deref(), Some("virtualbox"));
        assert_eq!(boxes[1].name, "ubuntu/trusty64");
        assert_eq!(boxes[1].version.as_deref(), Some("20190411.0.0"));
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_machine_readable("\n\n").unwrap().is_empty());
        assert!(installed_boxes(&[]).is_empty());
    }
}
