//! Decodes raw response frames into [device_data](crate::device_data) values.
//!
//! Responses carry no overall length prefix. Each command has its own fixed
//! layout, with an element count at a known offset (byte 1 for most tracking
//! commands, bytes 1-2 for the thermal pixel map). Integers are big-endian
//! pairs of bytes. Parsers only read as many elements as the frame declares,
//! so trailing bytes from a generously sized receive buffer are ignored.

use crate::command::{TrackingCommand, TuningParameter, ERROR_SENTINEL};
use crate::device_data::{
    FusionSample, Point, Position, RoomGeometry, ThermalResolution, Zone,
};
use crate::error::{KinseiError, Result};

use log::debug;
use nom::{
    bytes::complete::take,
    combinator::{map, opt},
    multi::{count, length_count},
    number::complete::{be_u16, be_u8},
    sequence::{preceded, tuple},
    Finish, IResult,
};

/// Any value the tracking server can answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceValue {
    #[allow(missing_docs)]
    Online(bool),
    #[allow(missing_docs)]
    Room(RoomGeometry),
    #[allow(missing_docs)]
    Positions(Vec<Position>),
    #[allow(missing_docs)]
    PersonsFixed(u8),
    #[allow(missing_docs)]
    PersonsFloat(f64),
    #[allow(missing_docs)]
    Fusion(Vec<FusionSample>),
    #[allow(missing_docs)]
    Zones(Vec<Zone>),
    /// Volts per sensor, 0 for sensors on a fixed supply.
    BatteryLevels(Vec<f64>),
    #[allow(missing_docs)]
    SensorsOnline(Vec<bool>),
    #[allow(missing_docs)]
    ThermalResolution(ThermalResolution),
    /// Tenths of a degree, row-major.
    ThermalPixels(Vec<u16>),
}

/// Reconstructs the unsigned big-endian pair at `offset`.
pub fn decode_fixed_point16(bytes: &[u8], offset: usize) -> Result<u16> {
    match bytes.get(offset..offset + 2) {
        Some(pair) => Ok(pair[0] as u16 * 256 + pair[1] as u16),
        None => Err(short_frame(bytes, offset + 2)),
    }
}

/// Reconstructs the two's complement big-endian pair at `offset`.
pub fn decode_signed16(bytes: &[u8], offset: usize) -> Result<i16> {
    match bytes.get(offset..offset + 2) {
        Some(pair) => Ok(i16::from_be_bytes([pair[0], pair[1]])),
        None => Err(short_frame(bytes, offset + 2)),
    }
}

fn byte_at(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes
        .get(offset)
        .copied()
        .ok_or_else(|| short_frame(bytes, offset + 1))
}

fn short_frame(bytes: &[u8], needed: usize) -> KinseiError {
    KinseiError::ProtocolDecode(format!(
        "frame has {} bytes, layout needs {}",
        bytes.len(),
        needed
    ))
}

/// Whether the device answered with the error sentinel.
pub fn is_error_sentinel(frame: &[u8]) -> bool {
    frame == [ERROR_SENTINEL]
}

fn point(input: &[u8]) -> IResult<&[u8], Point> {
    map(tuple((be_u16, be_u16)), |(x, y)| Point { x, y })(input)
}

/// Skips the echoed opcode in byte 0.
fn header(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take(1usize)(input)
}

fn parse_online(input: &[u8]) -> IResult<&[u8], bool> {
    map(preceded(header, be_u8), |flag| flag == 1)(input)
}

fn parse_room_size(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    preceded(header, tuple((be_u16, be_u16)))(input)
}

fn parse_room(input: &[u8]) -> IResult<&[u8], RoomGeometry> {
    map(
        tuple((parse_room_size, length_count(be_u8, point))),
        |((width, height), corners)| RoomGeometry {
            width,
            height,
            corners,
        },
    )(input)
}

/// Six bytes per slot: two reserved, then the coordinates.
fn parse_positions(input: &[u8]) -> IResult<&[u8], Vec<Position>> {
    let (rest, n) = preceded(header, be_u8)(input)?;
    count(map(preceded(take(2usize), point), Position::from), n as usize)(rest)
}

fn parse_persons_fixed(input: &[u8]) -> IResult<&[u8], u8> {
    preceded(header, be_u8)(input)
}

fn parse_persons_float(input: &[u8]) -> IResult<&[u8], f64> {
    map(preceded(header, be_u8), |tenths| tenths as f64 / 10.0)(input)
}

/// Reads `n` entries where only the last one may be missing its trailing
/// padding. A short entry anywhere else would shift every later entry.
fn entries_short_last<'a, T>(
    n: usize,
    mut full: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
    mut last: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Vec<T>> {
    move |input: &'a [u8]| {
        if n == 0 {
            return Ok((input, Vec::new()));
        }
        let (rest, mut entries) = count(&mut full, n - 1)(input)?;
        let (rest, tail) = last(rest)?;
        entries.push(tail);
        Ok((rest, entries))
    }
}

/// Seven bytes per entry: two reserved, x, y, then one pad byte. The
/// confidence is read from the low byte of y, which is where the device puts
/// it.
fn fusion_sample(x: u16, y_bytes: &[u8]) -> FusionSample {
    FusionSample {
        position: Point {
            x,
            y: y_bytes[0] as u16 * 256 + y_bytes[1] as u16,
        },
        confidence: y_bytes[1] as f64 / 10.0,
    }
}

fn fusion_entry(input: &[u8]) -> IResult<&[u8], FusionSample> {
    map(
        tuple((take(2usize), be_u16, take(2usize), take(1usize))),
        |(_, x, y_bytes, _): (&[u8], u16, &[u8], &[u8])| fusion_sample(x, y_bytes),
    )(input)
}

fn last_fusion_entry(input: &[u8]) -> IResult<&[u8], FusionSample> {
    map(
        tuple((take(2usize), be_u16, take(2usize), opt(take(1usize)))),
        |(_, x, y_bytes, _): (&[u8], u16, &[u8], Option<&[u8]>)| fusion_sample(x, y_bytes),
    )(input)
}

fn parse_fusion(input: &[u8]) -> IResult<&[u8], Vec<FusionSample>> {
    let (rest, n) = preceded(header, be_u8)(input)?;
    entries_short_last(n as usize, fusion_entry, last_fusion_entry)(rest)
}

fn parse_battery_levels(input: &[u8]) -> IResult<&[u8], Vec<f64>> {
    preceded(
        header,
        length_count(be_u8, map(be_u16, |centivolts| centivolts as f64 / 100.0)),
    )(input)
}

/// Five bytes per sensor, status first. Only the last entry may be cut short
/// after its status byte.
fn parse_sensors_online(input: &[u8]) -> IResult<&[u8], Vec<bool>> {
    let (rest, n) = preceded(header, be_u8)(input)?;
    entries_short_last(
        n as usize,
        map(tuple((be_u8, take(4usize))), |(status, _): (u8, &[u8])| status != 0),
        map(
            tuple((be_u8, opt(take(4usize)))),
            |(status, _): (u8, Option<&[u8]>)| status != 0,
        ),
    )(rest)
}

fn parse_thermal_resolution(input: &[u8]) -> IResult<&[u8], ThermalResolution> {
    map(
        preceded(header, tuple((be_u8, be_u8, be_u8))),
        |(cols, rows, pixel_size_mm)| ThermalResolution {
            cols,
            rows,
            pixel_size_mm,
        },
    )(input)
}

/// Three byte header with a 16 bit element count, then two bytes per pixel.
fn parse_thermal_pixels(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    preceded(header, length_count(be_u16, be_u16))(input)
}

/// Zones are variable-sized, so they are walked by offset. A circular zone
/// spans 7 bytes from its type byte. A polygonal one has its corner count
/// right after the type byte and the device advances `4n + 1` bytes past it.
fn decode_zones(frame: &[u8]) -> Result<Vec<Zone>> {
    let n_zones = byte_at(frame, 1)?;
    let mut zones = Vec::with_capacity(n_zones as usize);
    let mut index = 0;
    for _ in 0..n_zones {
        if byte_at(frame, 2 + index)? == 0 {
            let center = Point {
                x: decode_fixed_point16(frame, 3 + index)?,
                y: decode_fixed_point16(frame, 5 + index)?,
            };
            let radius = decode_fixed_point16(frame, 7 + index)?;
            zones.push(Zone::Circular { center, radius });
            index += 7;
        } else {
            let n_corners = byte_at(frame, 3 + index)? as usize;
            let corners = (0..n_corners)
                .map(|c| {
                    Ok(Point {
                        x: decode_fixed_point16(frame, 4 + index + 4 * c)?,
                        y: decode_fixed_point16(frame, 6 + index + 4 * c)?,
                    })
                })
                .collect::<Result<Vec<Point>>>()?;
            zones.push(Zone::Polygonal { corners });
            index += 4 * n_corners + 1;
        }
    }
    Ok(zones)
}

/// Runs a nom parser over a whole frame, turning its failure into a
/// [KinseiError::ProtocolDecode].
fn run<'a, T>(
    mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
    frame: &'a [u8],
) -> Result<T> {
    match parser(frame).finish() {
        Ok((_trailing, value)) => Ok(value),
        Err(e) => Err(KinseiError::ProtocolDecode(format!(
            "{:?} with {} bytes left of {}",
            e.code,
            e.input.len(),
            frame.len()
        ))),
    }
}

/// Decodes just the bounding box of a room size response.
pub fn decode_room_size(frame: &[u8]) -> Result<(u16, u16)> {
    reject_sentinel(frame)?;
    run(parse_room_size, frame)
}

/// Decodes `frame` as the response to `command`.
pub fn decode_response(command: TrackingCommand, frame: &[u8]) -> Result<DeviceValue> {
    reject_sentinel(frame)?;
    if let Some(&echo) = frame.first() {
        if echo != command.opcode() {
            // most likely a late answer to an earlier, timed out command
            debug!(
                "{:?} answered with opcode {:#04x}, expected {:#04x}",
                command,
                echo,
                command.opcode()
            );
        }
    }
    use TrackingCommand as TC;
    let value = match command {
        TC::CheckOnline => DeviceValue::Online(run(parse_online, frame)?),
        TC::RoomSize => DeviceValue::Room(run(parse_room, frame)?),
        TC::PersonsPosition => DeviceValue::Positions(run(parse_positions, frame)?),
        TC::NumberPersonsFixed => DeviceValue::PersonsFixed(run(parse_persons_fixed, frame)?),
        TC::NumberPersonsFloat => DeviceValue::PersonsFloat(run(parse_persons_float, frame)?),
        TC::FusionValues => DeviceValue::Fusion(run(parse_fusion, frame)?),
        TC::Zones => DeviceValue::Zones(decode_zones(frame)?),
        TC::BatteryLevels => DeviceValue::BatteryLevels(run(parse_battery_levels, frame)?),
        TC::CheckSensorsOnline => DeviceValue::SensorsOnline(run(parse_sensors_online, frame)?),
        TC::ThermalMapResolution => {
            DeviceValue::ThermalResolution(run(parse_thermal_resolution, frame)?)
        }
        TC::ThermalMapPixels => DeviceValue::ThermalPixels(run(parse_thermal_pixels, frame)?),
    };
    Ok(value)
}

/// Decodes the 3 byte answer to a tuning get or set: the opcode echo, then
/// the value ×100.
pub fn decode_tuning_value(param: TuningParameter, frame: &[u8]) -> Result<f64> {
    reject_sentinel(frame)?;
    let hundredths = if param.is_signed() {
        decode_signed16(frame, 1)? as f64
    } else {
        decode_fixed_point16(frame, 1)? as f64
    };
    Ok(hundredths / 100.0)
}

/// Whether a control command was acknowledged by echoing its opcode alone.
pub fn decode_echo(opcode: u8, frame: &[u8]) -> Result<bool> {
    reject_sentinel(frame)?;
    Ok(frame == [opcode])
}

fn reject_sentinel(frame: &[u8]) -> Result<()> {
    if is_error_sentinel(frame) {
        Err(KinseiError::DeviceRejected)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be(v: u16) -> [u8; 2] {
        v.to_be_bytes()
    }

    #[test]
    fn fixed_point_pairs() {
        let frame = [0x73, 0x03, 0xE8, 0xFF, 0x38];
        assert_eq!(decode_fixed_point16(&frame, 1).unwrap(), 1000);
        assert_eq!(decode_fixed_point16(&frame, 3).unwrap(), 65336);
        assert_eq!(decode_signed16(&frame, 3).unwrap(), -200);
        assert!(matches!(
            decode_fixed_point16(&frame, 4),
            Err(KinseiError::ProtocolDecode(_))
        ));
    }

    #[test]
    fn room_without_corners() {
        let mut frame = vec![0x73];
        frame.extend(be(1000));
        frame.extend(be(2000));
        frame.push(0);

        assert_eq!(
            decode_response(TrackingCommand::RoomSize, &frame).unwrap(),
            DeviceValue::Room(RoomGeometry {
                width: 1000,
                height: 2000,
                corners: vec![],
            })
        );
        assert_eq!(decode_room_size(&frame[..5]).unwrap(), (1000, 2000));
    }

    #[test]
    fn room_with_corners() {
        let mut frame = vec![0x73];
        frame.extend(be(4000));
        frame.extend(be(3000));
        frame.push(3);
        for (x, y) in [(0, 0), (4000, 0), (4000, 3000)] {
            frame.extend(be(x));
            frame.extend(be(y));
        }
        // receive buffers are oversized, junk after the layout is ignored
        frame.extend([0xAA; 16]);

        let DeviceValue::Room(room) = decode_response(TrackingCommand::RoomSize, &frame).unwrap()
        else {
            panic!("expected a room");
        };
        assert_eq!(
            room.corners,
            vec![Point::new(0, 0), Point::new(4000, 0), Point::new(4000, 3000)]
        );
    }

    #[test]
    fn positions_are_strided_by_six() {
        let mut frame = vec![0x64, 2];
        frame.extend([9, 9]);
        frame.extend(be(1500));
        frame.extend(be(2500));
        frame.extend([7, 7]);
        frame.extend(be(0));
        frame.extend(be(0));

        assert_eq!(
            decode_response(TrackingCommand::PersonsPosition, &frame).unwrap(),
            DeviceValue::Positions(vec![Position::new(1500, 2500), Position::ABSENT])
        );
    }

    #[test]
    fn positions_never_read_past_declared_count() {
        let mut frame = vec![0x64, 1, 0, 0];
        frame.extend(be(10));
        frame.extend(be(20));
        frame.extend([0xFF; 6]);
        assert_eq!(
            decode_response(TrackingCommand::PersonsPosition, &frame).unwrap(),
            DeviceValue::Positions(vec![Position::new(10, 20)])
        );
    }

    #[test]
    fn truncated_positions_fail() {
        let frame = [0x64, 2, 0, 0, 0x05, 0xDC, 0x09, 0xC4, 0, 0, 0x01];
        assert!(matches!(
            decode_response(TrackingCommand::PersonsPosition, &frame),
            Err(KinseiError::ProtocolDecode(_))
        ));
    }

    #[test]
    fn person_counts() {
        assert_eq!(
            decode_response(TrackingCommand::NumberPersonsFixed, &[0x6D, 3]).unwrap(),
            DeviceValue::PersonsFixed(3)
        );
        assert_eq!(
            decode_response(TrackingCommand::NumberPersonsFloat, &[0x6E, 25]).unwrap(),
            DeviceValue::PersonsFloat(2.5)
        );
    }

    #[test]
    fn fusion_confidence_is_low_byte_of_y() {
        let mut frame = vec![0x66, 2];
        frame.extend([0, 0]);
        frame.extend(be(1200));
        frame.extend(be(0x0314));
        frame.push(0);
        frame.extend([0, 0]);
        frame.extend(be(500));
        frame.extend(be(0x0100));

        let DeviceValue::Fusion(samples) =
            decode_response(TrackingCommand::FusionValues, &frame).unwrap()
        else {
            panic!("expected fusion values");
        };
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].position, Point::new(1200, 0x0314));
        assert!((samples[0].confidence - 2.0).abs() < 1e-9);
        assert_eq!(samples[1].position, Point::new(500, 256));
        assert_eq!(samples[1].confidence, 0.0);
    }

    #[test]
    fn zones_mixed() {
        let mut frame = vec![0x78, 2];
        // circular
        frame.push(0);
        frame.extend(be(1000));
        frame.extend(be(1100));
        frame.extend(be(300));
        // polygonal, three corners
        frame.push(1);
        frame.push(3);
        for (x, y) in [(10, 20), (30, 40), (50, 60)] {
            frame.extend(be(x));
            frame.extend(be(y));
        }

        assert_eq!(
            decode_response(TrackingCommand::Zones, &frame).unwrap(),
            DeviceValue::Zones(vec![
                Zone::Circular {
                    center: Point::new(1000, 1100),
                    radius: 300,
                },
                Zone::Polygonal {
                    corners: vec![Point::new(10, 20), Point::new(30, 40), Point::new(50, 60)],
                },
            ])
        );
    }

    #[test]
    fn zone_after_polygon_starts_four_n_plus_one_later() {
        // polygon with one corner: type at 2, count at 3, corner at 4..8, so
        // the next type byte sits at 2 + 5 = 7, the last byte of the corner
        let frame = [0x78, 2, 1, 1, 0, 10, 0, 0, 0, 1, 0, 2, 0, 3];
        assert_eq!(
            decode_response(TrackingCommand::Zones, &frame).unwrap(),
            DeviceValue::Zones(vec![
                Zone::Polygonal {
                    corners: vec![Point::new(10, 0)],
                },
                Zone::Circular {
                    center: Point::new(1, 2),
                    radius: 3,
                },
            ])
        );
    }

    #[test]
    fn batteries_and_sensors() {
        let mut frame = vec![0x76, 2];
        frame.extend(be(370));
        frame.extend(be(0));
        assert_eq!(
            decode_response(TrackingCommand::BatteryLevels, &frame).unwrap(),
            DeviceValue::BatteryLevels(vec![3.7, 0.0])
        );

        let frame = [0x7A, 3, 1, 9, 9, 9, 9, 0, 9, 9, 9, 9, 1];
        assert_eq!(
            decode_response(TrackingCommand::CheckSensorsOnline, &frame).unwrap(),
            DeviceValue::SensorsOnline(vec![true, false, true])
        );
    }

    #[test]
    fn only_last_sensor_may_be_short() {
        // the first entry is cut inside its padding, so byte 5 is not a status
        let frame = [0x7A, 2, 1, 0, 0, 5];
        assert!(matches!(
            decode_response(TrackingCommand::CheckSensorsOnline, &frame),
            Err(KinseiError::ProtocolDecode(_))
        ));

        let frame = [0x7A, 2, 1, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_response(TrackingCommand::CheckSensorsOnline, &frame).unwrap(),
            DeviceValue::SensorsOnline(vec![true, false])
        );
        assert_eq!(
            decode_response(TrackingCommand::CheckSensorsOnline, &[0x7A, 0]).unwrap(),
            DeviceValue::SensorsOnline(vec![])
        );
    }

    #[test]
    fn fusion_entry_missing_pad_before_another_fails() {
        let mut frame = vec![0x66, 2];
        frame.extend([0, 0]);
        frame.extend(be(1200));
        frame.extend(be(800));
        // no pad byte, the second entry starts here
        frame.extend([0, 0]);
        frame.extend(be(500));
        frame.extend(be(256));
        assert!(matches!(
            decode_response(TrackingCommand::FusionValues, &frame),
            Err(KinseiError::ProtocolDecode(_))
        ));
    }

    #[test]
    fn mismatched_echo_still_decodes() {
        assert_eq!(
            decode_response(TrackingCommand::NumberPersonsFixed, &[0x6E, 4]).unwrap(),
            DeviceValue::PersonsFixed(4)
        );
    }

    #[test]
    fn online_flag() {
        assert_eq!(
            decode_response(TrackingCommand::CheckOnline, &[0x74, 1]).unwrap(),
            DeviceValue::Online(true)
        );
        assert_eq!(
            decode_response(TrackingCommand::CheckOnline, &[0x74, 0]).unwrap(),
            DeviceValue::Online(false)
        );
    }

    #[test]
    fn thermal() {
        assert_eq!(
            decode_response(TrackingCommand::ThermalMapResolution, &[0x1A, 16, 12, 250]).unwrap(),
            DeviceValue::ThermalResolution(ThermalResolution {
                cols: 16,
                rows: 12,
                pixel_size_mm: 250,
            })
        );

        let mut frame = vec![0x1B];
        frame.extend(be(3));
        for p in [2950, 0, 3010] {
            frame.extend(be(p));
        }
        assert_eq!(
            decode_response(TrackingCommand::ThermalMapPixels, &frame).unwrap(),
            DeviceValue::ThermalPixels(vec![2950, 0, 3010])
        );
    }

    #[test]
    fn sentinel_is_rejected_for_every_command() {
        for opcode in 0..=u8::MAX {
            if let Some(command) = TrackingCommand::from_opcode(opcode) {
                assert!(matches!(
                    decode_response(command, &[ERROR_SENTINEL]),
                    Err(KinseiError::DeviceRejected)
                ));
            }
        }
    }

    #[test]
    fn tuning_values() {
        assert_eq!(
            decode_tuning_value(TuningParameter::BackgroundThreshold, &[0x03, 0x01, 0x2C]).unwrap(),
            3.0
        );
        assert_eq!(
            decode_tuning_value(TuningParameter::TemperatureThreshold, &[0x05, 0xFF, 0x38])
                .unwrap(),
            -2.0
        );
        assert!(decode_echo(0xFE, &[0xFE]).unwrap());
        assert!(!decode_echo(0xFE, &[0xFF]).unwrap());
        assert!(matches!(
            decode_echo(0x00, &[ERROR_SENTINEL]),
            Err(KinseiError::DeviceRejected)
        ));
    }
}
