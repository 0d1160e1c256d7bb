//! ALPS placement source
//!
//! Queries `alps_get_appinfo_ver3_err` from libalps and copies the returned
//! application, command and placement records into a [`RawRecordSet`].
//! The foreign record layouts never leave this module.
//!
//! Linking against libalps is opt-in through the `alps` cargo feature.
//! Without it the source reports the interface as unavailable.

use super::raw::{RawCommand, RawNode, RawRecordSet};
use super::{JobContext, PlacementSource};
use crate::config::ReaderConfig;
use crate::error::{MalformedKind, PlacementError, Result};
use std::env;
use std::path::PathBuf;

/// Return code of a successful `alps_get_appinfo*_err` call
const APPINFO_OK: i32 = 1;

/// Placement source backed by the ALPS application info interface
#[derive(Debug, Clone, Default)]
pub struct AlpsInterface {
    config: ReaderConfig,
}

impl AlpsInterface {
    /// Create a source using the given reader configuration
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Reader configuration in use
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Working directory aprun started the PEs in
    #[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
    fn launch_dir(&self) -> Result<String> {
        resolve_launch_dir(
            &self.config.workdir_var,
            env::var(&self.config.workdir_var).ok(),
            env::current_dir().ok(),
        )
    }
}

impl PlacementSource for AlpsInterface {
    fn name(&self) -> &'static str {
        "alps"
    }

    #[cfg(all(unix, feature = "alps"))]
    fn fetch(&self, context: &JobContext) -> Result<RawRecordSet> {
        let reply = ffi::query(context.apid())?;
        reply.into_records(context.apid(), &self.launch_dir()?)
    }

    #[cfg(not(all(unix, feature = "alps")))]
    fn fetch(&self, context: &JobContext) -> Result<RawRecordSet> {
        let _ = context;
        Err(PlacementError::unavailable(
            "alpsinfo was built without the `alps` feature",
        ))
    }
}

/// Pick the launch directory from the configured variable, then the cwd
#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
fn resolve_launch_dir(var: &str, value: Option<String>, cwd: Option<PathBuf>) -> Result<String> {
    value
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or(cwd)
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| {
            PlacementError::unavailable(format!(
                "cannot determine the launch directory: ${} is unset and the current directory is unreadable",
                var
            ))
        })
}

/// Map an appinfo return code to a result
///
/// ALPS returns 1 on success. Anything else is a failure, even when ALPS
/// left `err` at 0; the return code is reported in that case.
#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
fn check_return<F>(apid: u64, rc: i32, err: i32, message: F) -> Result<()>
where
    F: FnOnce() -> Option<String>,
{
    if rc == APPINFO_OK {
        return Ok(());
    }

    let (code, message) = match (err, message()) {
        (0, Some(msg)) => (rc, format!("{} (return code {})", msg, rc)),
        (0, None) => (rc, format!("ALPS appinfo query returned {}", rc)),
        (err, Some(msg)) => (err, msg),
        (err, None) => (err, "unknown ALPS error".to_string()),
    };
    tracing::warn!("ALPS appinfo query for apid {} failed: {}", apid, message);
    Err(PlacementError::query_failed(apid, code, message))
}

/// Records copied out of an ALPS reply, before PE numbering
#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
#[derive(Debug, Default)]
struct AlpsReply {
    commands: Vec<RawCommand>,
    places: Vec<Place>,
}

/// One placement list entry
#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
#[derive(Debug)]
struct Place {
    cmd_ix: usize,
    nid: u32,
    num_pes: u32,
    cpu_mask: Vec<u64>,
}

#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
impl Place {
    /// Convert the signed fields of placement entry `entry`
    fn from_raw(entry: usize, cmd_ix: i32, nid: i32, num_pes: i16, cpu_mask: Vec<u64>) -> Result<Self> {
        let invalid = |field: &'static str, value: i64| -> PlacementError {
            MalformedKind::InvalidPlaceEntry { entry, field, value }.into()
        };

        Ok(Self {
            cmd_ix: usize::try_from(cmd_ix).map_err(|_| invalid("command index", cmd_ix.into()))?,
            nid: u32::try_from(nid).map_err(|_| invalid("nid", nid.into()))?,
            num_pes: u32::try_from(num_pes).map_err(|_| invalid("PE count", num_pes.into()))?,
            cpu_mask,
        })
    }
}

#[cfg_attr(not(all(unix, feature = "alps")), allow(dead_code))]
impl AlpsReply {
    /// Expand placement entries into node and PE records
    ///
    /// ALPS numbers PEs consecutively in placement list order, across all
    /// commands. Every PE of an aprun shares the launch directory, and runs
    /// the command of the segment its node belongs to. A placement entry
    /// naming a command ALPS did not report is rejected.
    fn into_records(self, apid: u64, launch_dir: &str) -> Result<RawRecordSet> {
        let mut raw = RawRecordSet::new(apid);
        let mut next_rank = 0u32;

        for place in self.places {
            let command = self.commands.get(place.cmd_ix).ok_or_else(|| {
                PlacementError::from(MalformedKind::UnknownCommand {
                    node: place.nid,
                    index: place.cmd_ix,
                    count: self.commands.len(),
                })
            })?;

            let ranks = next_rank..next_rank + place.num_pes;
            next_rank += place.num_pes;

            for rank in ranks.clone() {
                raw.push_pe(rank, &command.name, launch_dir);
            }

            raw.nodes.push(
                RawNode::new(place.nid)
                    .with_command_index(place.cmd_ix)
                    .with_cpu_mask(place.cpu_mask)
                    .with_pes(ranks),
            );
        }

        raw.commands = self.commands;
        Ok(raw)
    }
}

#[cfg(all(unix, feature = "alps"))]
mod ffi {
    //! Mirrors of the `<alps/apInfo.h>` version 3 records

    use super::{AlpsReply, Place};
    use crate::error::{PlacementError, Result};
    use crate::reader::raw::RawCommand;
    use libc::{c_char, c_int, c_short, c_void};
    use std::ffi::CStr;
    use std::ptr;

    const CMD_NAME_LEN: usize = 32;
    const PROC_MASK_WORDS: usize = 8;

    #[repr(C)]
    #[allow(dead_code)]
    pub struct AppInfo {
        apid: u64,
        pagg: u64,
        flags: u64,
        fan_out: c_int,
        uid: c_int,
        gid: c_int,
        num_cmds: c_int,
        num_places: c_int,
        // ALPS fills the whole header struct; this absorbs fields not
        // mirrored above.
        reserved: [u8; 256],
    }

    #[repr(C)]
    #[allow(dead_code)]
    pub struct CmdDetail {
        flags: c_int,
        width: c_int,
        depth: c_int,
        fixed_per_node: c_int,
        memory: c_int,
        node_arch: c_int,
        node_cnt: c_int,
        cpus_per_cu: c_short,
        pes_per_seg: c_short,
        node_seg_cnt: c_short,
        seg_bits: u32,
        cmd: [c_char; CMD_NAME_LEN],
        accel_type: c_int,
    }

    #[repr(C)]
    #[allow(dead_code)]
    pub struct PlaceNodeListVer3 {
        cmd_ix: c_int,
        nid: c_int,
        num_pes: c_short,
        created_pes: c_short,
        proc_mask: [u64; PROC_MASK_WORDS],
    }

    // The arrays ALPS returns are walked with these strides.
    const _: () = assert!(std::mem::size_of::<CmdDetail>() == 76);
    const _: () = assert!(std::mem::size_of::<PlaceNodeListVer3>() == 80);

    #[link(name = "alps")]
    extern "C" {
        // The prototype in libalps.h pulls in a broken include, so it is
        // declared here directly.
        fn alps_get_appinfo_ver3_err(
            apid: u64,
            appinfo: *mut AppInfo,
            cmd_detail: *mut *mut CmdDetail,
            places: *mut *mut PlaceNodeListVer3,
            err_msg: *mut *mut c_char,
            err: *mut c_int,
        ) -> c_int;
    }

    /// Owns the arrays ALPS allocates and frees them on drop
    struct Allocation<T>(*mut T);

    impl<T> Drop for Allocation<T> {
        fn drop(&mut self) {
            if !self.0.is_null() {
                // SAFETY: ALPS allocates these arrays with malloc and hands
                // ownership to the caller.
                unsafe { libc::free(self.0 as *mut c_void) };
            }
        }
    }

    pub(super) fn query(apid: u64) -> Result<AlpsReply> {
        // SAFETY: AppInfo is plain old data; all-zero is a valid value.
        let mut appinfo: AppInfo = unsafe { std::mem::zeroed() };
        let mut cmd_detail: *mut CmdDetail = ptr::null_mut();
        let mut places: *mut PlaceNodeListVer3 = ptr::null_mut();
        let mut err_msg: *mut c_char = ptr::null_mut();
        let mut err: c_int = 0;

        // SAFETY: every out-pointer refers to a live local of the right type.
        let rc = unsafe {
            alps_get_appinfo_ver3_err(
                apid,
                &mut appinfo,
                &mut cmd_detail,
                &mut places,
                &mut err_msg,
                &mut err,
            )
        };
        let cmd_detail = Allocation(cmd_detail);
        let places = Allocation(places);

        super::check_return(apid, rc, err, || {
            // SAFETY: ALPS returns a NUL-terminated static message.
            (!err_msg.is_null())
                .then(|| unsafe { CStr::from_ptr(err_msg) }.to_string_lossy().into_owned())
        })?;

        let count = |n: c_int| {
            usize::try_from(n).map_err(|_| {
                PlacementError::query_failed(apid, rc, format!("ALPS reported {} records", n))
            })
        };
        let num_cmds = count(appinfo.num_cmds)?;
        let num_places = count(appinfo.num_places)?;
        if (num_cmds > 0 && cmd_detail.0.is_null()) || (num_places > 0 && places.0.is_null()) {
            return Err(PlacementError::query_failed(
                apid,
                rc,
                "ALPS reported records but returned no buffers",
            ));
        }

        let mut reply = AlpsReply::default();

        if num_cmds > 0 {
            // SAFETY: ALPS returns `num_cmds` contiguous command records.
            let cmds = unsafe { std::slice::from_raw_parts(cmd_detail.0, num_cmds) };
            reply.commands = cmds.iter().map(copy_command).collect();
        }

        if num_places > 0 {
            // SAFETY: ALPS returns `num_places` contiguous placement records.
            let entries = unsafe { std::slice::from_raw_parts(places.0, num_places) };
            reply.places = entries
                .iter()
                .enumerate()
                .map(|(i, p)| Place::from_raw(i, p.cmd_ix, p.nid, p.num_pes, p.proc_mask.to_vec()))
                .collect::<Result<_>>()?;
        }

        Ok(reply)
    }

    fn copy_command(cmd: &CmdDetail) -> RawCommand {
        let name_bytes: Vec<u8> = cmd
            .cmd
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();

        RawCommand {
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
            width: cmd.width,
            depth: cmd.depth,
            fixed_per_node: cmd.fixed_per_node,
            node_count: cmd.node_cnt,
            cpus_per_cu: cmd.cpus_per_cu.into(),
            pes_per_seg: cmd.pes_per_seg.into(),
            node_seg_count: cmd.node_seg_cnt.into(),
            seg_bits: cmd.seg_bits,
            accel_code: cmd.accel_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str) -> RawCommand {
        RawCommand {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_reply_numbers_pes_in_place_order() {
        let reply = AlpsReply {
            commands: vec![command("./a.out"), command("./helper")],
            places: vec![
                Place { cmd_ix: 0, nid: 20, num_pes: 2, cpu_mask: vec![0b11] },
                Place { cmd_ix: 0, nid: 21, num_pes: 2, cpu_mask: vec![0b11] },
                Place { cmd_ix: 1, nid: 22, num_pes: 1, cpu_mask: vec![0b1] },
            ],
        };

        let raw = reply.into_records(77, "/lus/scratch").unwrap();
        assert_eq!(raw.apid(), 77);
        assert_eq!(raw.node_entries(), 3);
        assert_eq!(raw.pe_entries(), 5);
        assert_eq!(raw.nodes[1].pes, vec![2, 3]);
        assert_eq!(raw.nodes[2].pes, vec![4]);
        assert_eq!(raw.nodes[2].cmd_ix, 1);
        assert_eq!(raw.pes[4].command, "./helper");
        assert_eq!(raw.pes[0].cwd, "/lus/scratch");
        assert_eq!(raw.commands.len(), 2);
    }

    #[test]
    fn test_reply_without_commands_is_rejected() {
        let reply = AlpsReply {
            commands: vec![],
            places: vec![Place { cmd_ix: 0, nid: 1, num_pes: 2, cpu_mask: vec![0b11] }],
        };
        let err = reply.into_records(9, "/tmp").unwrap_err();
        assert_eq!(
            err.malformed(),
            Some(&MalformedKind::UnknownCommand { node: 1, index: 0, count: 0 })
        );
        assert_eq!(err.offending_node(), Some(1));
    }

    #[test]
    fn test_reply_with_unknown_command_is_rejected() {
        let reply = AlpsReply {
            commands: vec![command("./a.out")],
            places: vec![
                Place { cmd_ix: 0, nid: 4, num_pes: 1, cpu_mask: vec![1] },
                Place { cmd_ix: 3, nid: 5, num_pes: 1, cpu_mask: vec![1] },
            ],
        };
        let err = reply.into_records(9, "/tmp").unwrap_err();
        assert!(matches!(
            err.malformed(),
            Some(MalformedKind::UnknownCommand { node: 5, index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_negative_place_fields_are_rejected() {
        let err = Place::from_raw(2, 0, -7, 4, vec![1]).unwrap_err();
        assert_eq!(
            err.malformed(),
            Some(&MalformedKind::InvalidPlaceEntry { entry: 2, field: "nid", value: -7 })
        );

        let err = Place::from_raw(0, 0, 12, -1, vec![1]).unwrap_err();
        assert!(matches!(
            err.malformed(),
            Some(MalformedKind::InvalidPlaceEntry { field: "PE count", value: -1, .. })
        ));

        let err = Place::from_raw(0, -1, 12, 1, vec![1]).unwrap_err();
        assert!(matches!(
            err.malformed(),
            Some(MalformedKind::InvalidPlaceEntry { field: "command index", .. })
        ));

        let place = Place::from_raw(0, 1, 12, 3, vec![0b111]).unwrap();
        assert_eq!((place.cmd_ix, place.nid, place.num_pes), (1, 12, 3));
    }

    #[test]
    fn test_only_return_code_one_is_success() {
        assert!(check_return(5, 1, 0, || None).is_ok());

        // A zero return with no error code must not pass as success.
        let err = check_return(5, 0, 0, || None).unwrap_err();
        match err {
            PlacementError::QueryFailed { apid, code, message } => {
                assert_eq!(apid, 5);
                assert_eq!(code, 0);
                assert!(message.contains("returned 0"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = check_return(5, 2, 0, || Some("partial reply".to_string())).unwrap_err();
        assert!(err.to_string().contains("partial reply (return code 2)"));
    }

    #[test]
    fn test_error_code_and_message_are_reported() {
        let err = check_return(8, -1, 14, || Some("apid not found".to_string())).unwrap_err();
        assert_eq!(err, PlacementError::query_failed(8, 14, "apid not found"));

        let err = check_return(8, -1, 14, || None).unwrap_err();
        assert_eq!(err, PlacementError::query_failed(8, 14, "unknown ALPS error"));
    }

    #[test]
    fn test_launch_dir_prefers_variable_then_cwd() {
        let dir = resolve_launch_dir("PWD", Some("/lus/run".into()), Some("/tmp".into()));
        assert_eq!(dir.unwrap(), "/lus/run");

        let dir = resolve_launch_dir("PWD", Some(String::new()), Some("/tmp".into()));
        assert_eq!(dir.unwrap(), "/tmp");
    }

    #[test]
    fn test_launch_dir_unknown_is_unavailable() {
        let err = resolve_launch_dir("ALPSINFO_TEST_NO_DIR", None, None).unwrap_err();
        assert!(matches!(err, PlacementError::InterfaceUnavailable(_)));
        assert!(err.to_string().contains("ALPSINFO_TEST_NO_DIR"));
    }

    #[test]
    fn test_launch_dir_reads_configured_variable() {
        std::env::set_var("ALPSINFO_TEST_LAUNCH_DIR", "/lus/scratch/job");
        let source =
            AlpsInterface::new(ReaderConfig::default().with_workdir_var("ALPSINFO_TEST_LAUNCH_DIR"));
        assert_eq!(source.launch_dir().unwrap(), "/lus/scratch/job");
    }

    #[cfg(not(feature = "alps"))]
    #[test]
    fn test_unavailable_without_feature() {
        let source = AlpsInterface::default();
        let context = JobContext::new(5).unwrap();
        let err = source.fetch(&context).unwrap_err();
        assert!(matches!(err, PlacementError::InterfaceUnavailable(_)));
    }
}
